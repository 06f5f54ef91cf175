//! Wire-shape tests for the CRD types: field names must match the
//! published API exactly, since both users and admission policies depend
//! on them.

use kube::CustomResourceExt;
use secrets_store_sync_controller::crd::{
    SecretObject, SecretObjectData, SecretProviderClass, SecretProviderClassSpec, SecretSync,
    SecretSyncSpec,
};

fn sample_secret_sync() -> SecretSync {
    SecretSync::new(
        "s1",
        SecretSyncSpec {
            service_account_name: "payments-sa".into(),
            secret_provider_class_name: "vault-payments".into(),
            secret_object: SecretObject {
                type_: "Opaque".into(),
                labels: [("team".to_string(), "payments".to_string())].into(),
                annotations: Default::default(),
                data: vec![SecretObjectData {
                    source_path: "db/password".into(),
                    target_key: "password".into(),
                }],
            },
            force_synchronization: "v2".into(),
        },
    )
}

#[test]
fn secret_sync_spec_uses_camel_case_keys() {
    let value = serde_json::to_value(sample_secret_sync()).unwrap();
    let spec = &value["spec"];

    assert_eq!(spec["serviceAccountName"], "payments-sa");
    assert_eq!(spec["secretProviderClassName"], "vault-payments");
    assert_eq!(spec["forceSynchronization"], "v2");
    assert_eq!(spec["secretObject"]["type"], "Opaque");
    assert_eq!(spec["secretObject"]["data"][0]["sourcePath"], "db/password");
    assert_eq!(spec["secretObject"]["data"][0]["targetKey"], "password");
}

#[test]
fn secret_sync_round_trips_through_json() {
    let original = sample_secret_sync();
    let json = serde_json::to_string(&original).unwrap();
    let parsed: SecretSync = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.spec.service_account_name, "payments-sa");
    assert_eq!(parsed.spec.secret_object.data.len(), 1);
    assert_eq!(parsed.spec.secret_object.data[0].target_key, "password");
}

#[test]
fn secret_sync_crd_identifies_the_api_group() {
    let crd = SecretSync::crd();

    assert_eq!(crd.spec.group, "secret-sync.x-k8s.io");
    assert_eq!(crd.spec.names.kind, "SecretSync");
    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1alpha1");
    // Status is a subresource, so spec-only writers can never touch it.
    assert!(version.subresources.as_ref().unwrap().status.is_some());
}

#[test]
fn provider_class_parses_driver_manifests() {
    // Fields owned by the CSI driver are ignored, only provider and
    // parameters are read.
    let manifest = serde_json::json!({
        "apiVersion": "secrets-store.csi.x-k8s.io/v1alpha1",
        "kind": "SecretProviderClass",
        "metadata": { "name": "vault-payments", "namespace": "payments" },
        "spec": {
            "provider": "vault",
            "parameters": { "vaultAddress": "https://vault:8200" },
            "secretObjects": [{ "ignored": true }]
        }
    });

    let spc: SecretProviderClass = serde_json::from_value(manifest).unwrap();
    assert_eq!(spc.spec.provider, "vault");
    assert_eq!(
        spc.spec.parameters.get("vaultAddress").map(String::as_str),
        Some("https://vault:8200")
    );
}

#[test]
fn provider_class_defaults_parameters_to_empty() {
    let spc = SecretProviderClass::new(
        "p",
        SecretProviderClassSpec {
            provider: "fake".into(),
            parameters: Default::default(),
        },
    );
    assert!(spc.spec.parameters.is_empty());
}

#[test]
fn status_serializes_conditions_in_metav1_shape() {
    use secrets_store_sync_controller::crd::{Condition, SecretSyncStatus};

    let status = SecretSyncStatus {
        sync_hash: "abc".into(),
        last_successful_sync_time: Some("2024-01-01T00:00:00Z".into()),
        conditions: vec![Condition {
            type_: "SecretCreated".into(),
            status: "True".into(),
            reason: "CreateSuccessful".into(),
            message: "Secret created successfully.".into(),
            last_transition_time: Some("2024-01-01T00:00:00Z".into()),
        }],
    };

    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["syncHash"], "abc");
    assert_eq!(value["lastSuccessfulSyncTime"], "2024-01-01T00:00:00Z");
    assert_eq!(value["conditions"][0]["type"], "SecretCreated");
    assert_eq!(value["conditions"][0]["lastTransitionTime"], "2024-01-01T00:00:00Z");
}
