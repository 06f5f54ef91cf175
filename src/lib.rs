//! # Secrets Store Sync Controller
//!
//! A Kubernetes controller that materializes external-secret-store contents
//! as native cluster `Secret` objects.
//!
//! ## Overview
//!
//! Users declare a `SecretSync` that references a `SecretProviderClass`
//! (an external-store descriptor) and a service account to authenticate
//! with. The controller:
//!
//! 1. **Watches `SecretSync` resources** across all namespaces
//! 2. **Mints scoped service account tokens** through the TokenRequest API,
//!    with caching and jittered refresh
//! 3. **Fetches secret material** from the provider plugin serving the
//!    class, over a local unix-socket gRPC interface
//! 4. **Fingerprints the assembled payload** so unchanged content never
//!    triggers a write
//! 5. **Applies the target Secret** server-side under a fixed field
//!    manager, stamping the controller marker label and a single owner
//!    reference
//! 6. **Reports typed conditions** (`SecretCreated`, `SecretUpdated`) with
//!    a closed reason taxonomy, plus Events and Prometheus metrics
//!
//! The controller never deletes Secrets; removal is left to the owner
//! reference garbage collector when the `SecretSync` goes away.

pub mod controller;
pub mod crd;
pub mod leader;
pub mod observability;
pub mod provider;
pub mod server;
pub mod token;

pub use crd::{
    Condition, SecretObject, SecretObjectData, SecretProviderClass, SecretProviderClassSpec,
    SecretSync, SecretSyncSpec, SecretSyncStatus,
};
