//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::Condition;

/// Condition types tracked on a RelayBroker
pub const CONDITION_TYPE_VALID: &str = "Valid";
pub const CONDITION_TYPE_DEPLOYED: &str = "Deployed";
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

/// Update or add a condition in the conditions list.
///
/// Setting a condition identical to the existing one (same status, reason,
/// and message) is a no-op, including the transition timestamp. Otherwise
/// the record is replaced in place; the transition time only moves when the
/// status itself changed. Repeated reconciliation passes therefore never
/// generate status churn for an unchanged outcome.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status == status && existing.reason == reason && existing.message == message {
            return;
        }

        let should_update_time = existing.status != status;

        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();

        if should_update_time {
            existing.last_transition_time = Utc::now().to_rfc3339();
        }
    } else {
        conditions.push(Condition::new(type_, status, reason, message));
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is present and True.
///
/// An absent condition means "never evaluated", which reads as not-true
/// here but must never be written back as False on that basis alone.
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Remove a condition by type
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}
