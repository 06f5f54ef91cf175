//! # Controller
//!
//! Reconciliation engine for `SecretSync` resources and its building
//! blocks.
//!
//! - `reconciler.rs` - the per-object state machine and queue error policy
//! - `conditions.rs` - condition types, reason taxonomy and retry set
//! - `fingerprint.rs` - content-derived sync hash
//! - `projection.rs` - provider file map to Secret data map projection
//! - `tls.rs` - certificate/key split for TLS-typed Secrets
//! - `writer.rs` - server-side apply of the managed Secret
//! - `backoff.rs` - per-item retry delay schedule

pub mod backoff;
pub mod conditions;
pub mod fingerprint;
pub mod projection;
pub mod reconciler;
pub mod tls;
pub mod writer;

pub use backoff::ExponentialBackoff;
pub use reconciler::{error_policy, reconcile, Context, PodIdentity, ReconcileError};
pub use writer::{CONTROLLER_MARKER_KEY, FIELD_MANAGER};
