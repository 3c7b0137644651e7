//! RelayBroker Custom Resource Definition
//!
//! A RelayBroker describes a clustered message-broker fleet: its size,
//! listeners, console exposure, and the broker properties applied to every
//! member. The operator converges a StatefulSet, Services, and a properties
//! Secret toward this declaration.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    AcceptorSpec, Condition, ConnectorSpec, ConsoleSpec, DeploymentPlan, ResourceTemplate,
};

/// Default broker image repository, tagged with the spec version
const DEFAULT_IMAGE_REPOSITORY: &str = "relaymq/broker";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "relaymq.io",
    version = "v1alpha1",
    kind = "RelayBroker",
    namespaced,
    status = "RelayBrokerStatus",
    shortname = "rmq",
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.deploymentPlan.size"}"#,
    printcolumn = r#"{"name":"Valid","type":"string","jsonPath":".status.conditions[?(@.type=='Valid')].status"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RelayBrokerSpec {
    #[serde(default)]
    pub deployment_plan: DeploymentPlan,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptors: Vec<AcceptorSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<ConnectorSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleSpec>,

    /// Raw "key=value" broker property lines, applied verbatim after
    /// duplicate-key validation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub broker_properties: Vec<String>,

    /// Nested broker configuration, flattened into dotted property keys
    /// and merged with `brokerProperties`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_config: Option<serde_json::Value>,

    /// Metadata overlays applied to generated resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_templates: Vec<ResourceTemplate>,

    /// Broker version, used to derive the default image tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl RelayBrokerSpec {
    /// Resolve the broker container image for this fleet
    pub fn image(&self) -> String {
        if let Some(image) = &self.deployment_plan.image {
            return image.clone();
        }
        let tag = self.version.as_deref().unwrap_or("latest");
        format!("{DEFAULT_IMAGE_REPOSITORY}:{tag}")
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayBrokerStatus {
    /// Validity and rollout conditions (Valid, Deployed, Ready)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Fleet size the controller is converging toward
    #[serde(default)]
    pub deployment_plan_size: i32,

    /// Broker pods currently ready
    #[serde(default)]
    pub ready_replicas: i32,

    /// Generation most recently acted on by the controller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
