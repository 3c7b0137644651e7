//! Main reconciler for RelayBroker resources
//!
//! Implements the controller pattern using kube-rs runtime.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::conditions::{is_condition_true, CONDITION_TYPE_READY};
use crate::controller::namespaces::WatchNamespaces;
use crate::controller::{resources, status, validation};
use crate::crd::{RelayBroker, RelayBrokerScaleDown};
use crate::drain::{coordinator, DrainRegistry};
use crate::error::{Error, Result};

/// Finalizer guarding owned-resource cleanup on RelayBroker deletion
pub const RELAY_BROKER_FINALIZER: &str = "relaymq.io/cleanup";

/// Requeue cadence once a fleet has converged
const STEADY_REQUEUE: Duration = Duration::from_secs(300);
/// Requeue cadence while a rollout is still progressing
const PROGRESS_REQUEUE: Duration = Duration::from_secs(15);

/// Shared state for both controllers
pub struct ControllerState {
    pub client: Client,
    pub watch_namespaces: WatchNamespaces,
    pub drain: Arc<DrainRegistry>,
}

/// Main entry point to start the RelayBroker and scale-down controllers
pub async fn run_controllers(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let brokers: Api<RelayBroker> = Api::all(client.clone());
    let scale_downs: Api<RelayBrokerScaleDown> = Api::all(client.clone());

    info!("Starting RelayBroker controller");

    // Verify CRDs exist
    match brokers.list(&Default::default()).await {
        Ok(_) => info!("RelayBroker CRD is available"),
        Err(e) => {
            error!(
                "RelayBroker CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "RelayBroker CRD not installed".to_string(),
            ));
        }
    }
    match scale_downs.list(&Default::default()).await {
        Ok(_) => info!("RelayBrokerScaleDown CRD is available"),
        Err(e) => {
            error!(
                "RelayBrokerScaleDown CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "RelayBrokerScaleDown CRD not installed".to_string(),
            ));
        }
    }

    let broker_controller = Controller::new(brokers, Config::default())
        // Watch owned resources for changes
        .owns::<StatefulSet>(Api::all(client.clone()), Config::default())
        .owns::<Service>(Api::all(client.clone()), Config::default())
        .owns::<Secret>(Api::all(client.clone()), Config::default())
        .owns::<RelayBrokerScaleDown>(Api::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile_broker, error_policy, state.clone())
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        });

    let scale_down_controller = Controller::new(scale_downs, Config::default())
        .shutdown_on_signal()
        .run(
            coordinator::reconcile_scale_down,
            coordinator::error_policy,
            state.clone(),
        )
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled scale-down: {:?}", obj),
                Err(e) => error!("Scale-down reconcile error: {:?}", e),
            }
        });

    tokio::join!(broker_controller, scale_down_controller);

    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A RelayBroker is created, updated, or deleted
/// - An owned resource (StatefulSet, Service, Secret) changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile_broker(obj: Arc<RelayBroker>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if !ctx.watch_namespaces.matches(&namespace) {
        debug!(
            "RelayBroker {}/{} is outside the watched namespaces, skipping",
            namespace,
            obj.name_any()
        );
        return Ok(Action::await_change());
    }

    let client = ctx.client.clone();
    let api: Api<RelayBroker> = Api::namespaced(client.clone(), &namespace);

    info!("Reconciling RelayBroker {}/{}", namespace, obj.name_any());

    // Use kube-rs built-in finalizer helper for clean lifecycle management
    finalizer(&api, RELAY_BROKER_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(broker) => apply_broker(&client, &broker).await,
            FinalizerEvent::Cleanup(broker) => cleanup_broker(&client, &broker).await,
        }
    })
    .await
    .map_err(Error::from)
}

/// Apply/create/update the RelayBroker resources
#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
async fn apply_broker(client: &Client, broker: &RelayBroker) -> Result<Action> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let name = broker.name_any();

    info!("Applying RelayBroker: {}/{}", namespace, name);

    let mut working = broker.status.clone().unwrap_or_default();

    // Validate the spec before touching any owned resource. An invalid
    // spec is terminal until the user edits it, so no timed requeue.
    let verdict = validation::validate(broker, &mut working.conditions);
    if !verdict.valid {
        warn!("Validation failed for {}/{}", namespace, name);
        status::write_status(client, broker, working).await?;
        return Ok(Action::await_change());
    }

    // 1. Properties Secret feeding every broker pod
    resources::ensure_properties_secret(client, broker).await?;

    // 2. Headless Service governing the StatefulSet, then client Service
    resources::ensure_headless_service(client, broker).await?;
    resources::ensure_client_service(client, broker).await?;

    // 3. The fleet StatefulSet itself
    resources::ensure_statefulset(client, broker).await?;

    // 4. Companion scale-down request when message migration is enabled
    if broker.spec.deployment_plan.message_migration {
        resources::ensure_scale_down(client, broker).await?;
    } else if let Err(e) = resources::delete_scale_down(client, broker).await {
        warn!("Failed to delete scale-down request: {:?}", e);
    }

    // 5. Read workload state into conditions and persist status
    let statefulset = status::observed_statefulset(client, broker).await?;
    status::apply_workload_conditions(&mut working, broker, statefulset.as_ref());
    status::write_status(client, broker, working.clone()).await?;

    // Requeue based on current state
    let requeue_duration = if is_condition_true(&working.conditions, CONDITION_TYPE_READY) {
        STEADY_REQUEUE
    } else {
        PROGRESS_REQUEUE
    };

    Ok(Action::requeue(requeue_duration))
}

/// Clean up resources when the RelayBroker is deleted
#[instrument(skip(client, broker), fields(name = %broker.name_any(), namespace = broker.namespace()))]
async fn cleanup_broker(client: &Client, broker: &RelayBroker) -> Result<Action> {
    let namespace = broker.namespace().unwrap_or_else(|| "default".to_string());
    let name = broker.name_any();

    info!("Cleaning up RelayBroker: {}/{}", namespace, name);

    // Delete resources in reverse order of creation

    // 1. Scale-down request, so no drain holds outlive the fleet
    if let Err(e) = resources::delete_scale_down(client, broker).await {
        warn!("Failed to delete scale-down request: {:?}", e);
    }

    // 2. StatefulSet
    if let Err(e) = resources::delete_statefulset(client, broker).await {
        warn!("Failed to delete StatefulSet: {:?}", e);
    }

    // 3. Services
    if let Err(e) = resources::delete_services(client, broker).await {
        warn!("Failed to delete Services: {:?}", e);
    }

    // 4. Properties Secret
    if let Err(e) = resources::delete_properties_secret(client, broker).await {
        warn!("Failed to delete properties Secret: {:?}", e);
    }

    info!("Cleanup complete for RelayBroker: {}/{}", namespace, name);

    // Return await_change to signal finalizer completion
    Ok(Action::await_change())
}

/// Error policy determines how to handle reconciliation errors
pub(crate) fn error_policy(
    broker: Arc<RelayBroker>,
    error: &Error,
    _ctx: Arc<ControllerState>,
) -> Action {
    error!(
        "Reconciliation error for {}: {:?}",
        broker.name_any(),
        error
    );

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
