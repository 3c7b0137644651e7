//! RelayMQ-K8s: Kubernetes Operator for RelayMQ Broker Fleets
//!
//! This crate provides a Kubernetes operator that turns RelayBroker
//! resources into running broker fleets and drains messages off pods
//! before a scale-down removes them.

pub mod controller;
pub mod crd;
pub mod drain;
pub mod error;
pub mod telemetry;

pub use crate::error::{Error, Result};
