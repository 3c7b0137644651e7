//! Fleet membership labels
//!
//! These labels tie generated resources and pods back to their owning
//! RelayBroker. The selector set is the stable identity the StatefulSet
//! selector, the client Services, and the scale-down drain watch all key on,
//! which is why user-supplied resource templates may not override them.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::RelayBroker;

pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_APP_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_FLEET: &str = "relaymq.io/fleet";

const APP_NAME: &str = "relay-broker";
const MANAGED_BY: &str = "relaymq-operator";

/// The labels that select a fleet's pods.
///
/// Used verbatim as the StatefulSet selector and as the label set of the
/// companion scale-down request, so a drain watcher finds exactly the pods
/// this broker owns.
pub fn selector_labels(broker_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_APP_NAME.to_string(), APP_NAME.to_string());
    labels.insert(LABEL_APP_INSTANCE.to_string(), broker_name.to_string());
    labels.insert(LABEL_FLEET.to_string(), broker_name.to_string());
    labels
}

/// Full label set stamped onto generated resources
pub fn standard_labels(broker: &RelayBroker) -> BTreeMap<String, String> {
    let mut labels = selector_labels(&broker.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    if let Some(version) = &broker.spec.version {
        labels.insert("app.kubernetes.io/version".to_string(), version.clone());
    }
    labels
}

/// Whether a label key is reserved for fleet selection
pub fn is_reserved_label(key: &str) -> bool {
    matches!(key, LABEL_APP_NAME | LABEL_APP_INSTANCE | LABEL_FLEET)
}
