//! # Secret Writer
//!
//! Server-side apply of the target Secret. The controller owns a fixed
//! field manager; force-apply resolves conflicts on the fields it declares
//! (data, type, labels, annotations, the owner reference) while leaving
//! fields owned by other managers untouched. Fields the controller stops
//! declaring are pruned on the next apply.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};

use crate::crd::SecretSync;

/// Field manager name stamped on every apply this controller performs.
pub const FIELD_MANAGER: &str = "secrets-store-sync-controller";

/// Label (and annotation) key reserved for the controller. Managed Secrets
/// carry the label with an empty value.
pub const CONTROLLER_MARKER_KEY: &str = "secrets-store.sync.x-k8s.io";

/// Build the apply patch for the managed Secret.
///
/// The patch carries exactly one owner reference, pointing at the
/// triggering SecretSync.
pub fn build_secret_patch(
    ss: &SecretSync,
    datamap: &BTreeMap<String, Vec<u8>>,
) -> serde_json::Value {
    let mut labels = ss.spec.secret_object.labels.clone();
    labels.insert(CONTROLLER_MARKER_KEY.to_string(), String::new());

    let data: BTreeMap<&str, ByteString> = datamap
        .iter()
        .map(|(key, value)| (key.as_str(), ByteString(value.clone())))
        .collect();

    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": ss.name_any(),
            "namespace": ss.namespace().unwrap_or_default(),
            "labels": labels,
            "annotations": ss.spec.secret_object.annotations,
            "ownerReferences": [{
                "apiVersion": SecretSync::api_version(&()),
                "kind": SecretSync::kind(&()),
                "name": ss.name_any(),
                "uid": ss.uid().unwrap_or_default(),
            }],
        },
        "type": ss.spec.secret_object.type_,
        "data": data,
    })
}

/// Create or update the target Secret via server-side apply.
pub async fn apply_secret(
    client: &Client,
    ss: &SecretSync,
    datamap: &BTreeMap<String, Vec<u8>>,
) -> Result<(), kube::Error> {
    let namespace = ss.namespace().unwrap_or_default();
    let api: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let patch = build_secret_patch(ss, datamap);

    api.patch(
        &ss.name_any(),
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&patch),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SecretObject, SecretObjectData, SecretSyncSpec};

    fn secret_sync() -> SecretSync {
        let mut ss = SecretSync::new(
            "s1",
            SecretSyncSpec {
                service_account_name: "sa".into(),
                secret_provider_class_name: "p".into(),
                secret_object: SecretObject {
                    type_: "Opaque".into(),
                    labels: [("team".to_string(), "payments".to_string())].into(),
                    annotations: Default::default(),
                    data: vec![SecretObjectData {
                        source_path: "foo".into(),
                        target_key: "bar".into(),
                    }],
                },
                force_synchronization: String::new(),
            },
        );
        ss.metadata.namespace = Some("n".into());
        ss.metadata.uid = Some("ss-uid".into());
        ss
    }

    #[test]
    fn test_patch_carries_marker_label_with_empty_value() {
        let datamap = BTreeMap::from([("bar".to_string(), b"secret".to_vec())]);
        let patch = build_secret_patch(&secret_sync(), &datamap);

        assert_eq!(patch["metadata"]["labels"][CONTROLLER_MARKER_KEY], "");
        assert_eq!(patch["metadata"]["labels"]["team"], "payments");
    }

    #[test]
    fn test_patch_carries_exactly_one_owner_reference() {
        let datamap = BTreeMap::new();
        let patch = build_secret_patch(&secret_sync(), &datamap);

        let owners = patch["metadata"]["ownerReferences"].as_array().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0]["apiVersion"], "secret-sync.x-k8s.io/v1alpha1");
        assert_eq!(owners[0]["kind"], "SecretSync");
        assert_eq!(owners[0]["name"], "s1");
        assert_eq!(owners[0]["uid"], "ss-uid");
    }

    #[test]
    fn test_patch_data_is_base64_encoded() {
        let datamap = BTreeMap::from([("bar".to_string(), b"secret".to_vec())]);
        let patch = build_secret_patch(&secret_sync(), &datamap);

        assert_eq!(patch["data"]["bar"], "c2VjcmV0");
        assert_eq!(patch["type"], "Opaque");
        assert_eq!(patch["kind"], "Secret");
    }
}
