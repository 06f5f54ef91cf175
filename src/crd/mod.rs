//! # Custom Resource Definitions
//!
//! API types consumed and produced by the sync controller:
//!
//! - `secret_sync.rs` - the `SecretSync` resource (spec and status)
//! - `provider_class.rs` - the read-only `SecretProviderClass` descriptor
//! - `status.rs` - status condition types and transition helpers

mod provider_class;
mod secret_sync;
mod status;

pub use provider_class::{SecretProviderClass, SecretProviderClassSpec};
pub use secret_sync::{SecretObject, SecretObjectData, SecretSync, SecretSyncSpec};
pub use status::{
    set_status_condition, Condition, SecretSyncStatus, CONDITION_STATUS_FALSE,
    CONDITION_STATUS_TRUE, CONDITION_STATUS_UNKNOWN,
};
