//! # Status Types
//!
//! Status carried on `SecretSync` objects: the sync hash, the last
//! successful sync timestamp, and the two typed conditions maintained by
//! the condition manager.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

/// Observed state of a SecretSync resource.
///
/// Written exclusively by the controller through the status subresource.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretSyncStatus {
    /// Fingerprint of the last successfully applied Secret payload plus the
    /// generations of the objects that produced it. Empty until the first
    /// successful write.
    #[serde(default)]
    pub sync_hash: String,

    /// RFC3339 timestamp of the last successful apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_sync_time: Option<String>,

    /// Latest observations of the sync state (`SecretCreated`, `SecretUpdated`)
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition represents a status condition for the resource
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of condition (True, False, Unknown)
    pub status: String,

    /// Machine-readable reason from the closed controller taxonomy
    pub reason: String,

    /// Human-readable message describing the condition
    #[serde(default)]
    pub message: String,

    /// Last time the condition status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Merge a condition into the list, keyed by condition type.
///
/// `lastTransitionTime` advances only when the status value actually
/// changes; reason and message are always replaced.
pub fn set_status_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    let now = Utc::now().to_rfc3339();
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.last_transition_time = Some(now);
                existing.status = condition.status;
            }
            existing.reason = condition.reason;
            existing.message = condition.message;
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
        }
    }
}
