//! RelayBrokerScaleDown Custom Resource Definition
//!
//! A scale-down request registers a broker fleet for drain protection: the
//! operator watches the fleet's pods within the request's scope and moves
//! messages off a pod before its removal is allowed to complete. Several
//! requests may target the same scope; they share one watcher.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "relaymq.io",
    version = "v1alpha1",
    kind = "RelayBrokerScaleDown",
    namespaced,
    shortname = "rmqsd",
    printcolumn = r#"{"name":"LocalOnly","type":"boolean","jsonPath":".spec.localOnly"}"#,
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RelayBrokerScaleDownSpec {
    /// Namespace whose pods this request governs. Unset means the request's
    /// own namespace when `localOnly` is true, otherwise all namespaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Restrict the watch to a single namespace even when `namespace` is
    /// unset
    #[serde(default)]
    pub local_only: bool,

    /// Labels selecting which broker pods belong to the fleet this request
    /// drains
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}
