//! # Service Account Tokens
//!
//! Caching layer over the Kubernetes TokenRequest API. Tokens minted for the
//! service account named by a `SecretSync` are forwarded to provider plugins
//! as mount attributes.

mod cache;

pub use cache::{
    KubeTokenIssuer, TokenCache, TokenError, TokenIssuer, SERVICE_ACCOUNT_TOKENS_ATTRIBUTE,
};
