//! # Condition Taxonomy
//!
//! The two condition types maintained on every observed `SecretSync` and the
//! closed set of reasons they may carry. Reason strings appear verbatim in
//! `status.conditions[*].reason` and are part of the controller's API.

use crate::crd::{
    set_status_condition, Condition, SecretSyncStatus, CONDITION_STATUS_UNKNOWN,
};

pub const CONDITION_TYPE_CREATE: &str = "SecretCreated";
pub const CONDITION_TYPE_UPDATE: &str = "SecretUpdated";

pub const REASON_PROVIDER_ERROR: &str = "ProviderError";
pub const REASON_INVALID_LABEL: &str = "InvalidClusterSecretLabelError";
pub const REASON_INVALID_ANNOTATION: &str = "InvalidClusterSecretAnnotationError";
pub const REASON_CONTROLLER_SYNC_ERROR: &str = "ControllerSyncError";
pub const REASON_CONTROLLER_PATCH_ERROR: &str = "ControllerPatchError";
pub const REASON_SPC_MISCONFIGURED: &str = "SecretProviderClassMisconfigured";
pub const REASON_REMOTE_FETCH_FAILED: &str = "RemoteSecretStoreFetchFailed";

pub const REASON_SYNC_STARTING: &str = "SyncStarting";
pub const REASON_NO_UPDATES_ATTEMPTED_YET: &str = "NoUpdatesAttemptedYet";

pub const REASON_SECRET_UP_TO_DATE: &str = "SecretUpToDate";
pub const REASON_CREATE_SUCCESSFUL: &str = "CreateSuccessful";

pub const MESSAGE_CREATE_SUCCESSFUL: &str = "Secret created successfully.";
pub const MESSAGE_UPDATE_SUCCESSFUL: &str = "Secret contains last observed values.";

/// Failure reasons that make the work item eligible for another sync
/// attempt on the next tick.
const RETRY_REASONS: &[&str] = &[
    REASON_SPC_MISCONFIGURED,
    REASON_INVALID_ANNOTATION,
    REASON_INVALID_LABEL,
    REASON_PROVIDER_ERROR,
    REASON_REMOTE_FETCH_FAILED,
    REASON_CONTROLLER_PATCH_ERROR,
    REASON_CONTROLLER_SYNC_ERROR,
];

pub fn triggers_retry(reason: &str) -> bool {
    RETRY_REASONS.contains(&reason)
}

/// True when any condition carries a failure reason from the retry set.
pub fn has_retryable_failure(conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .any(|condition| triggers_retry(&condition.reason))
}

/// Seed the two conditions in their initial unknown state.
pub fn init_conditions(status: &mut SecretSyncStatus) {
    set_status_condition(
        &mut status.conditions,
        Condition {
            type_: CONDITION_TYPE_CREATE.to_string(),
            status: CONDITION_STATUS_UNKNOWN.to_string(),
            reason: REASON_SYNC_STARTING.to_string(),
            message: String::new(),
            last_transition_time: None,
        },
    );
    set_status_condition(
        &mut status.conditions,
        Condition {
            type_: CONDITION_TYPE_UPDATE.to_string(),
            status: CONDITION_STATUS_UNKNOWN.to_string(),
            reason: REASON_NO_UPDATES_ATTEMPTED_YET.to_string(),
            message: String::new(),
            last_transition_time: None,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::CONDITION_STATUS_FALSE;

    #[test]
    fn test_all_failure_reasons_trigger_retry() {
        for reason in [
            REASON_SPC_MISCONFIGURED,
            REASON_INVALID_ANNOTATION,
            REASON_INVALID_LABEL,
            REASON_PROVIDER_ERROR,
            REASON_REMOTE_FETCH_FAILED,
            REASON_CONTROLLER_PATCH_ERROR,
            REASON_CONTROLLER_SYNC_ERROR,
        ] {
            assert!(triggers_retry(reason), "{reason} should trigger retry");
        }
    }

    #[test]
    fn test_terminal_reasons_do_not_trigger_retry() {
        for reason in [
            REASON_CREATE_SUCCESSFUL,
            REASON_SECRET_UP_TO_DATE,
            REASON_SYNC_STARTING,
            REASON_NO_UPDATES_ATTEMPTED_YET,
        ] {
            assert!(!triggers_retry(reason), "{reason} should not trigger retry");
        }
    }

    #[test]
    fn test_init_conditions_seeds_both_types() {
        let mut status = SecretSyncStatus::default();
        init_conditions(&mut status);

        assert_eq!(status.conditions.len(), 2);
        let create = status
            .conditions
            .iter()
            .find(|c| c.type_ == CONDITION_TYPE_CREATE)
            .unwrap();
        assert_eq!(create.status, CONDITION_STATUS_UNKNOWN);
        assert_eq!(create.reason, REASON_SYNC_STARTING);

        let update = status
            .conditions
            .iter()
            .find(|c| c.type_ == CONDITION_TYPE_UPDATE)
            .unwrap();
        assert_eq!(update.reason, REASON_NO_UPDATES_ATTEMPTED_YET);
    }

    #[test]
    fn test_retryable_failure_scan() {
        let mut status = SecretSyncStatus::default();
        init_conditions(&mut status);
        assert!(!has_retryable_failure(&status.conditions));

        set_status_condition(
            &mut status.conditions,
            Condition {
                type_: CONDITION_TYPE_CREATE.to_string(),
                status: CONDITION_STATUS_FALSE.to_string(),
                reason: REASON_PROVIDER_ERROR.to_string(),
                message: "fetch failed".to_string(),
                last_transition_time: None,
            },
        );
        assert!(has_retryable_failure(&status.conditions));
    }
}
