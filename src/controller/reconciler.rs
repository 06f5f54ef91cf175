//! # Reconciler
//!
//! Core reconciliation logic for `SecretSync` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Re-read the `SecretSync`; a deleted object drops the work item (the
//!    owner reference GC removes the Secret).
//! 2. Determine the phase: create while `status.syncHash` is empty,
//!    update afterwards.
//! 3. Seed the two status conditions on first contact.
//! 4. Validate reserved label/annotation keys.
//! 5. Load the `SecretProviderClass` from the same namespace.
//! 6. Fetch and project the secret data through the provider plugin.
//! 7. Fingerprint the assembled payload and compare with the stored hash.
//! 8. Stop when nothing changed and no failed condition asks for a retry.
//! 9. Preview success conditions, stamp hash and timestamp, then apply the
//!    Secret; a failed apply rolls both back before the status is persisted.
//!
//! The work queue retries failed items with per-item exponential backoff;
//! a successful sync resets the item's backoff.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::backoff::ExponentialBackoff;
use super::conditions::{
    has_retryable_failure, init_conditions, CONDITION_TYPE_CREATE, CONDITION_TYPE_UPDATE,
    MESSAGE_CREATE_SUCCESSFUL, MESSAGE_UPDATE_SUCCESSFUL, REASON_CONTROLLER_PATCH_ERROR,
    REASON_CONTROLLER_SYNC_ERROR, REASON_CREATE_SUCCESSFUL, REASON_INVALID_ANNOTATION,
    REASON_INVALID_LABEL, REASON_PROVIDER_ERROR, REASON_REMOTE_FETCH_FAILED,
    REASON_SECRET_UP_TO_DATE, REASON_SPC_MISCONFIGURED,
};
use super::fingerprint::compute_sync_hash;
use super::projection::project_secret_data;
use super::writer::{apply_secret, CONTROLLER_MARKER_KEY, FIELD_MANAGER};
use crate::crd::{
    set_status_condition, Condition, SecretObject, SecretProviderClass, SecretSync,
    SecretSyncStatus, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE,
};
use crate::observability::metrics;
use crate::provider::{mount_content, PluginClientPool};
use crate::token::TokenCache;

// Attribute keys the CSI driver would set on a mount request; kept
// identical so providers cannot tell the sync controller apart from the
// driver.
const CSI_POD_NAME: &str = "csi.storage.k8s.io/pod.name";
const CSI_POD_NAMESPACE: &str = "csi.storage.k8s.io/pod.namespace";
const CSI_POD_UID: &str = "csi.storage.k8s.io/pod.uid";
const CSI_POD_SERVICE_ACCOUNT_NAME: &str = "csi.storage.k8s.io/serviceAccount.name";

/// Downward-API environment variables carrying the controller pod identity.
pub const POD_NAME_ENV: &str = "SYNC_CONTROLLER_POD_NAME";
pub const POD_UID_ENV: &str = "SYNC_CONTROLLER_POD_UID";

// Per-item retry schedule, bounded globally.
const RETRY_MIN_BACKOFF_SECONDS: u64 = 1;
const RETRY_MAX_BACKOFF_SECONDS: u64 = 300;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("unable to fetch SecretSync: {0}")]
    GetSecretSync(#[source] kube::Error),

    #[error("failed to update status: {0}")]
    UpdateStatus(#[source] kube::Error),

    #[error("{message}")]
    Classified {
        reason: &'static str,
        message: String,
    },
}

impl ReconcileError {
    /// Metric label for the failure; classified errors use their condition
    /// reason.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Classified { reason, .. } => reason,
            ReconcileError::GetSecretSync(_) | ReconcileError::UpdateStatus(_) => "KubeApiError",
        }
    }
}

/// Identity of the controller pod, forwarded to providers as caller hints.
/// Process-wide configuration, read from the environment once at boot.
#[derive(Debug, Clone, Default)]
pub struct PodIdentity {
    pub pod_name: String,
    pub pod_uid: String,
}

impl PodIdentity {
    pub fn from_env() -> Self {
        Self {
            pod_name: std::env::var(POD_NAME_ENV).unwrap_or_default(),
            pod_uid: std::env::var(POD_UID_ENV).unwrap_or_default(),
        }
    }
}

/// Shared state handed to every reconcile invocation.
pub struct Context {
    pub client: Client,
    pub audiences: Vec<String>,
    pub token_cache: Arc<TokenCache>,
    pub providers: Arc<PluginClientPool>,
    pub recorder: Recorder,
    pub pod_identity: PodIdentity,
    backoffs: Mutex<HashMap<String, ExponentialBackoff>>,
}

impl Context {
    pub fn new(
        client: Client,
        audiences: Vec<String>,
        token_cache: Arc<TokenCache>,
        providers: Arc<PluginClientPool>,
        recorder: Recorder,
        pod_identity: PodIdentity,
    ) -> Self {
        Self {
            client,
            audiences,
            token_cache,
            providers,
            recorder,
            pod_identity,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    fn next_backoff(&self, key: &str) -> Duration {
        let mut backoffs = self.backoffs.lock().expect("backoff lock poisoned");
        backoffs
            .entry(key.to_string())
            .or_insert_with(|| {
                ExponentialBackoff::new(RETRY_MIN_BACKOFF_SECONDS, RETRY_MAX_BACKOFF_SECONDS)
            })
            .next_backoff()
    }

    fn clear_backoff(&self, key: &str) {
        let mut backoffs = self.backoffs.lock().expect("backoff lock poisoned");
        backoffs.remove(key);
    }
}

/// Reconcile one `SecretSync` work item.
pub async fn reconcile(ss: Arc<SecretSync>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    metrics::inc_reconciliations();

    let namespace = ss.namespace().unwrap_or_default();
    let name = ss.name_any();
    let backoff_key = format!("{namespace}/{name}");
    info!(namespace, name, "Reconciling SecretSync");

    let api: Api<SecretSync> = Api::namespaced(ctx.client.clone(), &namespace);
    // Re-read through the API so a queued item observes the latest spec
    // rather than the cache snapshot it was enqueued with.
    let Some(ss) = api
        .get_opt(&name)
        .await
        .map_err(ReconcileError::GetSecretSync)?
    else {
        debug!(namespace, name, "SecretSync is gone, dropping work item");
        return Ok(Action::await_change());
    };

    let mut status = ss.status.clone().unwrap_or_default();
    let condition_type = phase(&status);

    if status.conditions.len() < 2 {
        init_conditions(&mut status);
        patch_status(&api, &name, &status)
            .await
            .map_err(ReconcileError::UpdateStatus)?;
    }

    if let Err((reason, message)) = validate_labels_annotations(&ss.spec.secret_object) {
        return Err(fail(&ctx, &api, &ss, &mut status, condition_type, reason, message).await);
    }

    let spc_api: Api<SecretProviderClass> = Api::namespaced(ctx.client.clone(), &namespace);
    let spc_name = ss.spec.secret_provider_class_name.clone();
    let spc = match spc_api.get(&spc_name).await {
        Ok(spc) => spc,
        Err(err) => {
            error!(namespace, name = %spc_name, error = %err, "failed to get SecretProviderClass");
            let message = format!("failed to get SecretProviderClass {spc_name:?}: {err}");
            return Err(fail(
                &ctx,
                &api,
                &ss,
                &mut status,
                condition_type,
                REASON_SPC_MISCONFIGURED,
                message,
            )
            .await);
        }
    };

    let datamap = match fetch_secrets_from_provider(&ctx, &spc, &ss).await {
        Ok(datamap) => datamap,
        Err((reason, cause)) => {
            let message = format!("fetching secrets from the provider failed: {cause}");
            return Err(fail(&ctx, &api, &ss, &mut status, condition_type, reason, message).await);
        }
    };

    let sync_hash = match compute_sync_hash(&datamap, &spc, &ss) {
        Ok(hash) => hash,
        Err(err) => {
            error!(namespace, name, error = %err, "failed to compute state hash");
            return Err(fail(
                &ctx,
                &api,
                &ss,
                &mut status,
                condition_type,
                REASON_CONTROLLER_SYNC_ERROR,
                "failed to compute state hash".to_string(),
            )
            .await);
        }
    };
    let hash_changed = sync_hash != status.sync_hash;

    // Steady state: nothing changed and no failed condition asks for a
    // retry.
    if !should_sync(&status.conditions, hash_changed) {
        debug!(namespace, name, "secret is up to date, nothing to sync");
        ctx.clear_backoff(&backoff_key);
        metrics::observe_reconcile_duration(start.elapsed().as_secs_f64());
        return Ok(Action::await_change());
    }

    // Preview the success conditions without persisting, so a failed apply
    // below can overwrite them before anything reaches the API server.
    if condition_type == CONDITION_TYPE_CREATE {
        set_condition(
            &mut status,
            CONDITION_TYPE_CREATE,
            CONDITION_STATUS_TRUE,
            REASON_CREATE_SUCCESSFUL,
            MESSAGE_CREATE_SUCCESSFUL,
        );
        set_condition(
            &mut status,
            CONDITION_TYPE_UPDATE,
            CONDITION_STATUS_TRUE,
            REASON_SECRET_UP_TO_DATE,
            MESSAGE_UPDATE_SUCCESSFUL,
        );
    } else if hash_changed {
        set_condition(
            &mut status,
            CONDITION_TYPE_UPDATE,
            CONDITION_STATUS_TRUE,
            REASON_SECRET_UP_TO_DATE,
            MESSAGE_UPDATE_SUCCESSFUL,
        );
    }

    // Snapshot for rollback in case the apply is rejected.
    let previous_hash = status.sync_hash.clone();
    let previous_time = status.last_successful_sync_time.clone();

    status.sync_hash = sync_hash.clone();
    status.last_successful_sync_time = Some(Utc::now().to_rfc3339());

    if let Err(err) = apply_secret(&ctx.client, &ss, &datamap).await {
        error!(namespace, name, error = %err, "failed to patch secret");

        status.sync_hash = previous_hash;
        status.last_successful_sync_time = previous_time;

        let message = format!("failed to patch secret {name:?}: {err}");
        metrics::observe_admission_denial(&message);
        return Err(fail(
            &ctx,
            &api,
            &ss,
            &mut status,
            condition_type,
            REASON_CONTROLLER_PATCH_ERROR,
            message,
        )
        .await);
    }

    patch_status(&api, &name, &status)
        .await
        .map_err(ReconcileError::UpdateStatus)?;
    ctx.clear_backoff(&backoff_key);

    let (event_reason, event_note) = if condition_type == CONDITION_TYPE_CREATE {
        (REASON_CREATE_SUCCESSFUL, MESSAGE_CREATE_SUCCESSFUL)
    } else {
        (REASON_SECRET_UP_TO_DATE, MESSAGE_UPDATE_SUCCESSFUL)
    };
    publish_event(&ctx, &ss, EventType::Normal, event_reason, event_note).await;

    metrics::observe_reconcile_duration(start.elapsed().as_secs_f64());
    debug!(namespace, name, sync_hash, "Done, updated status");
    Ok(Action::await_change())
}

/// Queue-side error policy: classify for metrics and requeue with the
/// item's next backoff delay.
pub fn error_policy(ss: Arc<SecretSync>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    let namespace = ss.namespace().unwrap_or_default();
    let name = ss.name_any();
    metrics::inc_reconcile_errors(error.reason());

    let delay = ctx.next_backoff(&format!("{namespace}/{name}"));
    warn!(
        namespace,
        name,
        error = %error,
        requeue_seconds = delay.as_secs(),
        "Reconciliation failed, requeueing"
    );
    Action::requeue(delay)
}

/// Create while no hash has ever been recorded, update afterwards.
fn phase(status: &SecretSyncStatus) -> &'static str {
    if status.sync_hash.is_empty() {
        CONDITION_TYPE_CREATE
    } else {
        CONDITION_TYPE_UPDATE
    }
}

/// A sync is warranted by a content change or by a prior failure from the
/// retry set.
fn should_sync(conditions: &[Condition], hash_changed: bool) -> bool {
    hash_changed || has_retryable_failure(conditions)
}

/// Reject user metadata that collides with the reserved controller key.
/// The label is tolerated with an empty value since that is exactly what
/// the controller stamps itself.
fn validate_labels_annotations(
    secret_object: &SecretObject,
) -> Result<(), (&'static str, String)> {
    if secret_object
        .labels
        .get(CONTROLLER_MARKER_KEY)
        .is_some_and(|value| !value.is_empty())
    {
        return Err((
            REASON_INVALID_LABEL,
            format!("label {CONTROLLER_MARKER_KEY} is reserved for use by the Secrets Store Sync Controller"),
        ));
    }

    if secret_object.annotations.contains_key(CONTROLLER_MARKER_KEY) {
        return Err((
            REASON_INVALID_ANNOTATION,
            format!("annotation {CONTROLLER_MARKER_KEY} is reserved for use by the Secrets Store Sync Controller"),
        ));
    }

    Ok(())
}

/// Fetch the provider content for the pair and project it into the Secret
/// data map. Failures come back pre-classified as a condition reason plus
/// cause.
async fn fetch_secrets_from_provider(
    ctx: &Context,
    spc: &SecretProviderClass,
    ss: &SecretSync,
) -> Result<BTreeMap<String, Vec<u8>>, (&'static str, String)> {
    let provider_name = &spc.spec.provider;
    let provider = ctx.providers.get(provider_name).map_err(|err| {
        error!(provider = %provider_name, error = %err, "failed to get provider client");
        (REASON_SPC_MISCONFIGURED, err.to_string())
    })?;

    let namespace = ss.namespace().unwrap_or_default();
    let token_attrs = ctx
        .token_cache
        .provider_token_attrs(&namespace, &ss.spec.service_account_name, &ctx.audiences)
        .await
        .map_err(|err| {
            error!(service_account = %ss.spec.service_account_name, error = %err, "failed to get service account token");
            (REASON_CONTROLLER_SYNC_ERROR, err.to_string())
        })?;

    let attributes = prepare_provider_params(
        &spc.spec.parameters,
        &ctx.pod_identity,
        &namespace,
        &ss.spec.service_account_name,
        token_attrs,
    )
    .map_err(|err| (REASON_CONTROLLER_SYNC_ERROR, err.to_string()))?;

    let (_object_versions, files) = mount_content(
        provider.as_ref(),
        attributes,
        "{}".to_string(),
        &BTreeMap::new(),
    )
    .await
    .map_err(|err| {
        error!(provider = %provider_name, error = %err, "failed to get secrets from provider");
        (REASON_PROVIDER_ERROR, err.to_string())
    })?;

    project_secret_data(
        &ss.spec.secret_object.data,
        &ss.spec.secret_object.type_,
        &files,
    )
    .map_err(|err| (REASON_REMOTE_FETCH_FAILED, err.to_string()))
}

/// Mimic the mount parameters the CSI driver would send to the provider:
/// the class parameters, the caller-identity hints and the scoped token
/// bundle, serialized as a single JSON attributes string.
fn prepare_provider_params(
    parameters: &BTreeMap<String, String>,
    pod_identity: &PodIdentity,
    namespace: &str,
    service_account_name: &str,
    token_attrs: Option<(String, String)>,
) -> Result<String, serde_json::Error> {
    let mut parameters = parameters.clone();
    parameters.insert(CSI_POD_NAME.to_string(), pod_identity.pod_name.clone());
    parameters.insert(CSI_POD_UID.to_string(), pod_identity.pod_uid.clone());
    parameters.insert(CSI_POD_NAMESPACE.to_string(), namespace.to_string());
    parameters.insert(
        CSI_POD_SERVICE_ACCOUNT_NAME.to_string(),
        service_account_name.to_string(),
    );
    if let Some((key, value)) = token_attrs {
        parameters.insert(key, value);
    }
    serde_json::to_string(&parameters)
}

fn set_condition(
    status: &mut SecretSyncStatus,
    condition_type: &str,
    condition_status: &str,
    reason: &str,
    message: &str,
) {
    set_status_condition(
        &mut status.conditions,
        Condition {
            type_: condition_type.to_string(),
            status: condition_status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: None,
        },
    );
}

/// Record a classified failure: flip the phase condition, persist the
/// status (best effort, like every condition write), emit a warning event
/// and hand back the typed error for the queue.
async fn fail(
    ctx: &Context,
    api: &Api<SecretSync>,
    ss: &SecretSync,
    status: &mut SecretSyncStatus,
    condition_type: &str,
    reason: &'static str,
    message: String,
) -> ReconcileError {
    set_condition(status, condition_type, CONDITION_STATUS_FALSE, reason, &message);
    if let Err(err) = patch_status(api, &ss.name_any(), status).await {
        error!(name = %ss.name_any(), error = %err, "Failed to update status");
    }
    publish_event(ctx, ss, EventType::Warning, reason, &message).await;
    ReconcileError::Classified { reason, message }
}

async fn patch_status(
    api: &Api<SecretSync>,
    name: &str,
    status: &SecretSyncStatus,
) -> Result<(), kube::Error> {
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

/// Events are fire-and-forget; a failed publish must never break the
/// reconcile.
async fn publish_event(
    ctx: &Context,
    ss: &SecretSync,
    type_: EventType,
    reason: &str,
    note: &str,
) {
    let event = Event {
        type_,
        reason: reason.to_string(),
        note: Some(note.to_string()),
        action: "Sync".to_string(),
        secondary: None,
    };
    let reference = kube::Resource::object_ref(ss, &());
    if let Err(err) = ctx.recorder.publish(&event, &reference).await {
        warn!(reason, error = %err, "Failed to publish Kubernetes event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::conditions::{REASON_NO_UPDATES_ATTEMPTED_YET, REASON_SYNC_STARTING};
    use crate::crd::CONDITION_STATUS_UNKNOWN;

    fn secret_object(labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> SecretObject {
        SecretObject {
            type_: "Opaque".into(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            data: vec![],
        }
    }

    fn condition(type_: &str, status: &str, reason: &str) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: String::new(),
            last_transition_time: None,
        }
    }

    #[test]
    fn test_phase_create_until_first_hash() {
        let mut status = SecretSyncStatus::default();
        assert_eq!(phase(&status), CONDITION_TYPE_CREATE);

        status.sync_hash = "abc".into();
        assert_eq!(phase(&status), CONDITION_TYPE_UPDATE);
    }

    #[test]
    fn test_reserved_label_with_value_is_rejected() {
        let secret_object = secret_object(&[(CONTROLLER_MARKER_KEY, "x")], &[]);

        let (reason, message) = validate_labels_annotations(&secret_object).unwrap_err();

        assert_eq!(reason, REASON_INVALID_LABEL);
        assert_eq!(
            message,
            "label secrets-store.sync.x-k8s.io is reserved for use by the Secrets Store Sync Controller"
        );
    }

    #[test]
    fn test_reserved_label_with_empty_value_is_tolerated() {
        // An empty value is what the controller writes itself.
        let secret_object = secret_object(&[(CONTROLLER_MARKER_KEY, "")], &[]);
        assert!(validate_labels_annotations(&secret_object).is_ok());
    }

    #[test]
    fn test_reserved_annotation_is_rejected() {
        let secret_object = secret_object(&[], &[(CONTROLLER_MARKER_KEY, "")]);

        let (reason, _) = validate_labels_annotations(&secret_object).unwrap_err();

        assert_eq!(reason, REASON_INVALID_ANNOTATION);
    }

    #[test]
    fn test_ordinary_metadata_is_accepted() {
        let secret_object = secret_object(&[("team", "payments")], &[("note", "hi")]);
        assert!(validate_labels_annotations(&secret_object).is_ok());
    }

    #[test]
    fn test_should_sync_steady_state() {
        let conditions = vec![
            condition(CONDITION_TYPE_CREATE, CONDITION_STATUS_TRUE, REASON_CREATE_SUCCESSFUL),
            condition(CONDITION_TYPE_UPDATE, CONDITION_STATUS_TRUE, REASON_SECRET_UP_TO_DATE),
        ];
        assert!(!should_sync(&conditions, false));
    }

    #[test]
    fn test_should_sync_on_hash_change() {
        let conditions = vec![
            condition(CONDITION_TYPE_CREATE, CONDITION_STATUS_TRUE, REASON_CREATE_SUCCESSFUL),
            condition(CONDITION_TYPE_UPDATE, CONDITION_STATUS_TRUE, REASON_SECRET_UP_TO_DATE),
        ];
        assert!(should_sync(&conditions, true));
    }

    #[test]
    fn test_should_sync_on_failed_condition() {
        let conditions = vec![
            condition(CONDITION_TYPE_CREATE, CONDITION_STATUS_FALSE, REASON_PROVIDER_ERROR),
            condition(CONDITION_TYPE_UPDATE, CONDITION_STATUS_UNKNOWN, REASON_NO_UPDATES_ATTEMPTED_YET),
        ];
        assert!(should_sync(&conditions, false));
    }

    #[test]
    fn test_initial_conditions_do_not_force_sync() {
        let conditions = vec![
            condition(CONDITION_TYPE_CREATE, CONDITION_STATUS_UNKNOWN, REASON_SYNC_STARTING),
            condition(CONDITION_TYPE_UPDATE, CONDITION_STATUS_UNKNOWN, REASON_NO_UPDATES_ATTEMPTED_YET),
        ];
        // The initial create still happens because the hash comparison
        // reports a change against the empty stored hash.
        assert!(!should_sync(&conditions, false));
        assert!(should_sync(&conditions, true));
    }

    #[test]
    fn test_provider_params_include_caller_identity() {
        let pod_identity = PodIdentity {
            pod_name: "controller-0".into(),
            pod_uid: "pod-uid".into(),
        };
        let class_params = BTreeMap::from([("vaultAddress".to_string(), "https://v".to_string())]);

        let attributes =
            prepare_provider_params(&class_params, &pod_identity, "n", "payments-sa", None)
                .unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&attributes).unwrap();

        assert_eq!(parsed.get(CSI_POD_NAME).map(String::as_str), Some("controller-0"));
        assert_eq!(parsed.get(CSI_POD_UID).map(String::as_str), Some("pod-uid"));
        assert_eq!(parsed.get(CSI_POD_NAMESPACE).map(String::as_str), Some("n"));
        assert_eq!(
            parsed.get(CSI_POD_SERVICE_ACCOUNT_NAME).map(String::as_str),
            Some("payments-sa")
        );
        assert_eq!(parsed.get("vaultAddress").map(String::as_str), Some("https://v"));
    }

    #[test]
    fn test_provider_params_splice_token_bundle() {
        let attributes = prepare_provider_params(
            &BTreeMap::new(),
            &PodIdentity::default(),
            "n",
            "sa",
            Some((
                "csi.storage.k8s.io/serviceAccount.tokens".to_string(),
                r#"{"aud":{"token":"t"}}"#.to_string(),
            )),
        )
        .unwrap();

        let parsed: BTreeMap<String, String> = serde_json::from_str(&attributes).unwrap();
        assert_eq!(
            parsed.get("csi.storage.k8s.io/serviceAccount.tokens").map(String::as_str),
            Some(r#"{"aud":{"token":"t"}}"#)
        );
    }

    #[test]
    fn test_rollback_snapshot_restores_status_fields() {
        let mut status = SecretSyncStatus {
            sync_hash: "old-hash".into(),
            last_successful_sync_time: Some("2024-01-01T00:00:00Z".into()),
            conditions: vec![],
        };

        let previous_hash = status.sync_hash.clone();
        let previous_time = status.last_successful_sync_time.clone();
        status.sync_hash = "new-hash".into();
        status.last_successful_sync_time = Some(Utc::now().to_rfc3339());

        // Apply failed: restore the snapshots.
        status.sync_hash = previous_hash;
        status.last_successful_sync_time = previous_time;

        assert_eq!(status.sync_hash, "old-hash");
        assert_eq!(
            status.last_successful_sync_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }
}
