//! Message-drain orchestration for broker scale-down
//!
//! When a fleet StatefulSet shrinks, the highest-ordinal pods are removed
//! first. Each departing pod must hand its undelivered messages to peer
//! brokers before Kubernetes reclaims it. The modules here watch fleets for
//! shrinking, hold departing pods back with a finalizer, instruct the broker
//! management endpoint to drain them, and release the pods once empty.

pub mod controller;
pub mod coordinator;
pub mod management;
pub mod registry;

pub use controller::{DrainConfig, DrainController, DrainPhase, Instance, PodKey, DRAIN_FINALIZER};
pub use management::{DrainRequester, DrainResponse, HttpDrainClient};
pub use registry::{DrainRegistry, ScopeKey};
