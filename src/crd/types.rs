//! Shared types for RelayMQ broker specifications
//!
//! These types are used across the CRD definitions and controller logic.
//! They define the broker fleet topology, client-facing listeners, console
//! exposure, and the metadata overlays users can apply to generated resources.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired shape of the broker fleet
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    /// Number of broker pods in the fleet
    #[serde(default = "default_size")]
    pub size: i32,

    /// Broker container image override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Whether broker journals are stored on persistent volumes
    #[serde(default)]
    pub persistence_enabled: bool,

    /// Drain messages off a pod before a scale-down removes it.
    /// When true the operator maintains a companion scale-down resource
    /// for the fleet.
    #[serde(default)]
    pub message_migration: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,
}

fn default_size() -> i32 {
    1
}

// Keep `Default` in agreement with the serde field defaults: a wholly
// absent `deploymentPlan` must mean the same fleet as an empty one.
impl Default for DeploymentPlan {
    fn default() -> Self {
        Self {
            size: default_size(),
            image: None,
            persistence_enabled: false,
            message_migration: false,
            storage: None,
        }
    }
}

/// Persistent volume sizing for broker journals
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default = "default_storage_size")]
    pub size: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

fn default_storage_size() -> String {
    "2Gi".to_string()
}

/// A listener the broker accepts client connections on
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceptorSpec {
    pub name: String,
    pub port: i32,

    /// Comma-separated wire protocols this acceptor speaks (e.g. "CORE,AMQP")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocols: Option<String>,

    /// Name of a pre-existing TLS Secret mounted for this acceptor.
    /// The operator consumes the Secret by name, it never creates one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_secret: Option<String>,

    /// Expose the acceptor through the client Service
    #[serde(default)]
    pub expose: bool,
}

/// An outbound bridge to a peer broker or external endpoint
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSpec {
    pub name: String,
    pub host: String,
    pub port: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_secret: Option<String>,
}

/// Management console exposure
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleSpec {
    #[serde(default)]
    pub expose: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_secret: Option<String>,
}

/// Metadata overlay applied to generated resources
///
/// A template without a selector applies to every generated resource;
/// with a selector it applies only to resources matching kind and/or name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<TemplateSelector>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ResourceTemplate {
    /// Whether this template targets the given resource kind and name
    pub fn matches(&self, kind: &str, name: &str) -> bool {
        match &self.selector {
            None => true,
            Some(sel) => {
                sel.kind.as_deref().map(|k| k == kind).unwrap_or(true)
                    && sel.name.as_deref().map(|n| n == name).unwrap_or(true)
            }
        }
    }
}

/// Status condition following Kubernetes API conventions
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. "Valid", "Deployed", "Ready")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// Generation of the spec this condition was derived from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(type_: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }
}
