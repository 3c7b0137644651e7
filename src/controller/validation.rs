//! Structural validation of a RelayBroker spec
//!
//! Runs before any resource is deployed and records its outcome as the
//! Valid condition. A failed check is a spec defect the user has to edit
//! away, so the verdict is never retryable: re-running the same checks on
//! the same spec would fail the same way.

use tracing::warn;

use crate::controller::conditions::{
    set_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_VALID,
};
use crate::controller::properties;
use crate::controller::resources;
use crate::controller::selectors;
use crate::crd::{Condition, RelayBroker};

pub const VALID_REASON_SUCCESS: &str = "SpecValidated";
pub const VALID_REASON_RESERVED_LABEL: &str = "ReservedSelectorLabel";
pub const VALID_REASON_DUPLICATE_ACCEPTOR: &str = "DuplicateAcceptorName";
pub const VALID_REASON_DUPLICATE_PROPERTY: &str = "DuplicateBrokerProperty";

/// Outcome of a validation pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    /// Whether re-running without a spec edit could change the outcome
    pub retryable: bool,
}

impl Verdict {
    fn pass() -> Self {
        Verdict {
            valid: true,
            retryable: false,
        }
    }

    fn fail() -> Self {
        Verdict {
            valid: false,
            retryable: false,
        }
    }
}

/// Validate the spec and record exactly one Valid condition.
///
/// Checks short-circuit in order: reserved selector labels in resource
/// templates, acceptor name collisions, then duplicate broker property keys.
pub fn validate(broker: &RelayBroker, conditions: &mut Vec<Condition>) -> Verdict {
    for (i, template) in broker.spec.resource_templates.iter().enumerate() {
        for key in template.labels.keys() {
            if selectors::is_reserved_label(key) {
                let message = format!(
                    "label \"{key}\" is reserved for fleet selection and cannot be overridden by resource template Templates[{i}]"
                );
                warn!("Spec rejected: {}", message);
                set_condition(
                    conditions,
                    CONDITION_TYPE_VALID,
                    CONDITION_STATUS_FALSE,
                    VALID_REASON_RESERVED_LABEL,
                    &message,
                );
                return Verdict::fail();
            }
        }
    }

    // Acceptor names become Service and container port names, which
    // Kubernetes requires to be unique within an object.
    let mut seen_acceptors: Vec<&str> = Vec::new();
    for acceptor in &broker.spec.acceptors {
        let message = if acceptor.name == resources::CONSOLE_PORT_NAME {
            Some(format!(
                "acceptor name \"{}\" collides with the built-in console port",
                acceptor.name
            ))
        } else if seen_acceptors.contains(&acceptor.name.as_str()) {
            Some(format!(
                "acceptor name \"{}\" is declared more than once",
                acceptor.name
            ))
        } else {
            seen_acceptors.push(&acceptor.name);
            None
        };

        if let Some(message) = message {
            warn!("Spec rejected: {}", message);
            set_condition(
                conditions,
                CONDITION_TYPE_VALID,
                CONDITION_STATUS_FALSE,
                VALID_REASON_DUPLICATE_ACCEPTOR,
                &message,
            );
            return Verdict::fail();
        }
    }

    if let Err(err) = properties::key_value_pairs(&broker.spec.broker_properties) {
        let message = format!("brokerProperties rejected: {err}");
        warn!("Spec rejected: {}", message);
        set_condition(
            conditions,
            CONDITION_TYPE_VALID,
            CONDITION_STATUS_FALSE,
            VALID_REASON_DUPLICATE_PROPERTY,
            &message,
        );
        return Verdict::fail();
    }

    set_condition(
        conditions,
        CONDITION_TYPE_VALID,
        CONDITION_STATUS_TRUE,
        VALID_REASON_SUCCESS,
        "Spec passed structural validation",
    );
    Verdict::pass()
}
