//! Registry of per-scope drain controllers
//!
//! One drain controller exists per watch scope for the lifetime of the
//! process. The registry owns the only cross-task exclusive section in the
//! drain path: check-then-create under a mutex, so two scale-down requests
//! arriving together never race two controllers into the same scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use kube::Client;
use tracing::info;

use super::controller::{DrainConfig, DrainController};

/// Namespace scope a drain controller watches
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Every namespace
    Wildcard,
    Namespace(String),
}

impl ScopeKey {
    pub fn from_namespace(namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => ScopeKey::Namespace(ns.to_string()),
            _ => ScopeKey::Wildcard,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Wildcard => write!(f, "*"),
            ScopeKey::Namespace(ns) => write!(f, "{ns}"),
        }
    }
}

/// Process-wide map of drain controllers, injected wherever controllers
/// are resolved rather than reached through a global
pub struct DrainRegistry {
    client: Client,
    config: DrainConfig,
    controllers: Mutex<HashMap<ScopeKey, Arc<DrainController>>>,
}

impl DrainRegistry {
    pub fn new(client: Client, config: DrainConfig) -> Self {
        Self {
            client,
            config,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// Fetch the controller for a scope, creating it when absent.
    ///
    /// Returns the controller and whether this call created it. Exactly one
    /// caller observes `true` per scope; everyone else shares that instance.
    /// Controllers are never removed, so an existing controller accumulates
    /// further scale-down requests via `add_instance`.
    pub fn get_or_create(&self, scope: ScopeKey) -> (Arc<DrainController>, bool) {
        let mut controllers = self.controllers.lock().unwrap();

        if let Some(existing) = controllers.get(&scope) {
            return (existing.clone(), false);
        }

        let controller = Arc::new(DrainController::new(
            self.client.clone(),
            scope.clone(),
            self.config.clone(),
        ));
        controllers.insert(scope.clone(), controller.clone());
        info!("Created drain controller for scope {}", scope);

        (controller, true)
    }

    pub fn len(&self) -> usize {
        self.controllers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
