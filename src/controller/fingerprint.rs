//! # Sync Hash
//!
//! Content-derived fingerprint that decides whether a Secret write is
//! needed. The hash covers the assembled data map plus the identity and
//! generation of both the `SecretSync` and its `SecretProviderClass`, so a
//! change to any input produces a different hash while an unchanged world
//! reconciles to a no-op.
//!
//! The construction is deliberately expensive (PBKDF2, one invocation per
//! reconcile): a logged hash must not be a cheap brute-force target for
//! reconstructing secret material.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use kube::ResourceExt;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;

use crate::crd::{SecretProviderClass, SecretSync};

const PBKDF2_ITERATIONS: u32 = 100_000;
const DERIVED_KEY_BYTES: usize = 32;

/// Compute the sync hash for the assembled secret data.
///
/// The derived key doubles as HMAC key and message; only the lowercase hex
/// MAC leaves this function. The exact string is never compared across
/// controller implementations.
pub fn compute_sync_hash(
    secret_data: &BTreeMap<String, Vec<u8>>,
    spc: &SecretProviderClass,
    ss: &SecretSync,
) -> Result<String, serde_json::Error> {
    let encoded: BTreeMap<&str, String> = secret_data
        .iter()
        .map(|(key, value)| (key.as_str(), BASE64.encode(value)))
        .collect();
    let mut password = serde_json::to_vec(&encoded)?;

    let envelope = [
        spc.uid().unwrap_or_default(),
        spc.metadata.generation.unwrap_or_default().to_string(),
        ss.uid().unwrap_or_default(),
        ss.metadata.generation.unwrap_or_default().to_string(),
        ss.spec.force_synchronization.clone(),
    ]
    .join("|");
    password.extend_from_slice(envelope.as_bytes());

    let salt = ss.uid().unwrap_or_default();

    let mut derived_key = [0u8; DERIVED_KEY_BYTES];
    pbkdf2_hmac::<Sha512>(&password, salt.as_bytes(), PBKDF2_ITERATIONS, &mut derived_key);

    let mut mac = Hmac::<Sha512>::new_from_slice(&derived_key)
        .expect("HMAC accepts keys of any length");
    mac.update(&derived_key);

    Ok(hex::encode(mac.finalize().into_bytes()))
}
