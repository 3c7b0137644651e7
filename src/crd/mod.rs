//! Custom Resource Definitions for RelayMQ-K8s
//!
//! This module defines the Kubernetes CRDs for managing RelayMQ broker fleets.

mod relay_broker;
mod scale_down;
pub mod types;


pub use relay_broker::{RelayBroker, RelayBrokerSpec, RelayBrokerStatus};
pub use scale_down::{RelayBrokerScaleDown, RelayBrokerScaleDownSpec};
pub use types::*;
