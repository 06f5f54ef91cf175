//! # SecretProviderClass Custom Resource
//!
//! External-store descriptor owned by the Secrets Store CSI driver project.
//! The sync controller only reads the provider name and its parameter map;
//! any driver-specific fields are ignored on deserialization.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Descriptor of an external secret store and how to query it.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "secrets-store.csi.x-k8s.io",
    version = "v1alpha1",
    kind = "SecretProviderClass",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SecretProviderClassSpec {
    /// Name of the provider plugin serving this class
    pub provider: String,

    /// Provider-specific parameters, passed through to the plugin verbatim
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}
