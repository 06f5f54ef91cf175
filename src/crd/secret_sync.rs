//! # SecretSync Custom Resource
//!
//! A `SecretSync` declares that the contents of an external secret store,
//! described by a `SecretProviderClass` in the same namespace, should be
//! materialized as a Kubernetes `Secret` with the same name as the
//! `SecretSync`. The referenced service account is used to mint the
//! identity tokens forwarded to the provider plugin.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: secret-sync.x-k8s.io/v1alpha1
//! kind: SecretSync
//! metadata:
//!   name: my-db-credentials
//!   namespace: payments
//! spec:
//!   serviceAccountName: payments-sa
//!   secretProviderClassName: vault-payments
//!   secretObject:
//!     type: Opaque
//!     data:
//!       - sourcePath: db/password
//!         targetKey: password
//! ```

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::SecretSyncStatus;

/// Desired state of a synced secret.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "secret-sync.x-k8s.io",
    version = "v1alpha1",
    kind = "SecretSync",
    namespaced,
    status = "SecretSyncStatus",
    printcolumn = r#"{"name":"Created", "type":"string", "jsonPath":".status.conditions[?(@.type==\"SecretCreated\")].status"}"#,
    printcolumn = r#"{"name":"Last Sync", "type":"string", "jsonPath":".status.lastSuccessfulSyncTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecretSyncSpec {
    /// Service account whose tokens are forwarded to the provider plugin
    pub service_account_name: String,

    /// Name of the SecretProviderClass in the same namespace that describes
    /// the external store to fetch from
    pub secret_provider_class_name: String,

    /// Shape of the Secret to materialize
    pub secret_object: SecretObject,

    /// Opaque user-controlled value; changing it forces a re-sync even when
    /// the provider content is unchanged
    #[serde(default)]
    pub force_synchronization: String,
}

/// Template for the materialized Secret.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObject {
    /// Secret type (e.g. `Opaque`, `kubernetes.io/tls`)
    #[serde(rename = "type")]
    pub type_: String,

    /// Labels copied onto the Secret. The controller marker key is reserved.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Annotations copied onto the Secret. The controller marker key is reserved.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Projections from provider file paths to Secret data keys
    #[serde(default)]
    pub data: Vec<SecretObjectData>,
}

/// One source file to target key projection.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectData {
    /// Path of the file in the provider mount response
    pub source_path: String,

    /// Key in the Secret data map the file contents are written to
    pub target_key: String,
}
