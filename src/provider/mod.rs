//! # Provider Plugins
//!
//! Clients for secrets store provider plugins. Plugins serve the
//! `v1alpha1.CSIDriverProvider` gRPC service over unix domain sockets placed
//! in one of the configured provider directories.
//!
//! - `grpc.rs` - generated protocol types
//! - `client.rs` - the plugin client pool, mount/version helpers and retry

mod client;
pub mod grpc;

pub use client::{
    mount_content, version, PluginClientPool, PoolError, ProviderClient, ProviderError,
};
