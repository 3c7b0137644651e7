//! Controller module for RelayBroker reconciliation
//! This module contains the main controller loop, reconciliation logic,
//! and resource management for broker fleets.

pub mod conditions;
pub mod namespaces;
pub mod properties;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
mod resources;
#[cfg(test)]
mod resources_test;
pub mod selectors;
pub mod status;
pub mod validation;

pub use namespaces::WatchNamespaces;
pub use properties::{flatten_config, key_value_pairs, DuplicateKeyError, PropertyPair};
pub use reconciler::{run_controllers, ControllerState, RELAY_BROKER_FINALIZER};
pub use resources::{headless_service_name, CONSOLE_PORT, FIELD_MANAGER};
pub use validation::{validate, Verdict};
