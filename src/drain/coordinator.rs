//! RelayBrokerScaleDown coordination
//!
//! Reconciles scale-down requests into the drain registry: resolve the
//! request's namespace scope, bring up the scope's drain controller if it
//! does not exist yet, and register the request's label selection with it.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use crate::controller::ControllerState;
use crate::crd::RelayBrokerScaleDown;
use crate::error::{Error, Result};

use super::controller::Instance;
use super::management::HttpDrainClient;
use super::registry::ScopeKey;

/// Scope a scale-down request governs.
///
/// An explicit `spec.namespace` always wins. Without one, `localOnly` pins
/// the request to its own namespace; otherwise it covers the whole cluster.
pub fn resolve_scope(request: &RelayBrokerScaleDown) -> ScopeKey {
    if let Some(ns) = request.spec.namespace.as_deref() {
        if !ns.is_empty() {
            return ScopeKey::Namespace(ns.to_string());
        }
    }

    if request.spec.local_only {
        if let Some(own) = request.namespace() {
            return ScopeKey::Namespace(own);
        }
    }

    ScopeKey::Wildcard
}

#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
pub async fn reconcile_scale_down(
    obj: Arc<RelayBrokerScaleDown>,
    ctx: Arc<ControllerState>,
) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if !ctx.watch_namespaces.matches(&namespace) {
        debug!(
            "RelayBrokerScaleDown {}/{} is outside the watched namespaces, skipping",
            namespace,
            obj.name_any()
        );
        return Ok(Action::await_change());
    }

    // Drain controllers outlive the requests that spawned them: a deleted
    // request must not tear down drains still in flight for other fleets
    // in the same scope.
    if obj.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let scope = resolve_scope(&obj);
    let (controller, created) = ctx.drain.get_or_create(scope.clone());

    if created {
        let config = ctx.drain.config();
        let requester = HttpDrainClient::new(config.management_port, config.request_timeout)?;
        controller.start(Arc::new(requester));
    }

    controller
        .add_instance(Instance {
            name: obj.name_any(),
            namespace: match &scope {
                ScopeKey::Namespace(ns) => Some(ns.clone()),
                ScopeKey::Wildcard => None,
            },
            labels: obj.spec.labels.clone(),
        })
        .await;

    info!(
        "Scale-down request {}/{} active in drain scope {}",
        namespace,
        obj.name_any(),
        scope
    );

    Ok(Action::await_change())
}

/// Error policy for the scale-down controller
pub fn error_policy(
    request: Arc<RelayBrokerScaleDown>,
    error: &Error,
    _ctx: Arc<ControllerState>,
) -> Action {
    error!(
        "Scale-down reconciliation error for {}: {:?}",
        request.name_any(),
        error
    );

    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
