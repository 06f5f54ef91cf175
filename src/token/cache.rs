//! # Token Cache
//!
//! Caches service account tokens minted through the TokenRequest API so that
//! repeated reconciles of the same `SecretSync` do not hammer the API server.
//!
//! Lookup flow:
//! - Check the cache for the current token request.
//! - If the token exists and does not require a refresh, return it.
//! - Attempt to refresh the token.
//! - If the refresh succeeds, cache and return the new token.
//! - If the refresh fails and the old token is still valid, log and return
//!   the old token.
//! - If the refresh fails and the old token is no longer valid, return an
//!   error.
//!
//! A background sweep deletes expired entries once a minute.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec, TokenRequestStatus};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, PostParams};
use kube::Client;
use rand::Rng;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Attribute key under which the per-audience token bundle is forwarded to
/// provider plugins.
pub const SERVICE_ACCOUNT_TOKENS_ATTRIBUTE: &str = "csi.storage.k8s.io/serviceAccount.tokens";

/// Tokens older than this always refresh, regardless of remaining TTL.
const MAX_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Sweep interval for expired cache entries.
const GC_PERIOD: Duration = Duration::from_secs(60);

/// Upper bound of the random refresh jitter.
const MAX_JITTER_SECONDS: f64 = 10.0;

/// Expiration requested for tokens forwarded to providers.
const PROVIDER_TOKEN_EXPIRATION_SECONDS: i64 = 600;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("the API server does not have TokenRequest endpoints enabled")]
    EndpointNotEnabled,

    #[error("failed to fetch token: {0}")]
    Fetch(#[source] kube::Error),

    #[error("token {key} expired and refresh failed: {source}")]
    ExpiredAndRefreshFailed {
        key: String,
        #[source]
        source: Box<TokenError>,
    },

    #[error("failed to serialize token attributes: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Issues tokens against the TokenRequest subresource of a service account.
///
/// Abstracted behind a trait so tests can inject canned responses.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(
        &self,
        namespace: &str,
        name: &str,
        request: &TokenRequest,
    ) -> Result<TokenRequest, TokenError>;
}

/// Production issuer backed by the API server.
pub struct KubeTokenIssuer {
    client: Client,
    token_requests_supported: OnceCell<bool>,
}

impl KubeTokenIssuer {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            token_requests_supported: OnceCell::new(),
        }
    }

    /// Discovery probe for the `serviceaccounts/token` subresource, checked
    /// once so a 404 from a missing endpoint gets a more helpful message
    /// than a 404 from a missing service account.
    async fn token_requests_supported(&self) -> bool {
        *self
            .token_requests_supported
            .get_or_init(|| async {
                match self.client.list_core_api_resources("v1").await {
                    Ok(list) => list
                        .resources
                        .iter()
                        .any(|resource| resource.name == "serviceaccounts/token"),
                    Err(_) => true,
                }
            })
            .await
    }
}

#[async_trait]
impl TokenIssuer for KubeTokenIssuer {
    async fn issue(
        &self,
        namespace: &str,
        name: &str,
        request: &TokenRequest,
    ) -> Result<TokenRequest, TokenError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api
            .create_token_request(name, &PostParams::default(), request)
            .await
        {
            Ok(token) => Ok(token),
            Err(kube::Error::Api(api_err))
                if api_err.code == 404 && !self.token_requests_supported().await =>
            {
                Err(TokenError::EndpointNotEnabled)
            }
            Err(err) => Err(TokenError::Fetch(err)),
        }
    }
}

/// Cache of service account tokens keyed by the full token request identity.
pub struct TokenCache {
    issuer: Box<dyn TokenIssuer>,
    cache: RwLock<HashMap<String, TokenRequest>>,
}

impl TokenCache {
    pub fn new(issuer: Box<dyn TokenIssuer>) -> Self {
        Self {
            issuer,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn the background sweep that evicts expired entries.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    /// Get a token for the service account, from cache or the API server.
    pub async fn get_token(
        &self,
        namespace: &str,
        name: &str,
        request: &TokenRequest,
    ) -> Result<TokenRequest, TokenError> {
        let key = cache_key(name, namespace, request);

        let cached = {
            let cache = self.cache.read().expect("token cache lock poisoned");
            cache.get(&key).cloned()
        };

        if let Some(token) = &cached {
            if !requires_refresh(token) {
                return Ok(token.clone());
            }
        }

        let fresh = match self.issuer.issue(namespace, name, request).await {
            Ok(token) => token,
            Err(err) => {
                return match cached {
                    None => Err(err),
                    Some(token) if expired(&token) => Err(TokenError::ExpiredAndRefreshFailed {
                        key,
                        source: Box::new(err),
                    }),
                    Some(token) => {
                        warn!(cache_key = %key, error = %err, "Could not refresh token, returning still-valid cached token");
                        Ok(token)
                    }
                };
            }
        };

        let mut cache = self.cache.write().expect("token cache lock poisoned");
        cache.insert(key, fresh.clone());
        Ok(fresh)
    }

    /// Build the provider attribute bundle: one freshly scoped token per
    /// audience, serialized as a single JSON attribute value.
    ///
    /// An empty audience list yields no attribute at all.
    pub async fn provider_token_attrs(
        &self,
        namespace: &str,
        service_account_name: &str,
        audiences: &[String],
    ) -> Result<Option<(String, String)>, TokenError> {
        if audiences.is_empty() {
            return Ok(None);
        }

        let mut outputs: BTreeMap<String, TokenRequestStatus> = BTreeMap::new();
        for audience in audiences {
            let request = TokenRequest {
                spec: TokenRequestSpec {
                    audiences: vec![audience.clone()],
                    expiration_seconds: Some(PROVIDER_TOKEN_EXPIRATION_SECONDS),
                    ..Default::default()
                },
                ..Default::default()
            };

            let token = self
                .get_token(namespace, service_account_name, &request)
                .await?;
            if let Some(status) = token.status {
                outputs.insert(audience.clone(), status);
            }
        }

        debug!(
            service_account = service_account_name,
            namespace, "Fetched service account token attrs"
        );
        let serialized = serde_json::to_string(&outputs)?;
        Ok(Some((
            SERVICE_ACCOUNT_TOKENS_ATTRIBUTE.to_string(),
            serialized,
        )))
    }

    fn sweep(&self) {
        let mut cache = self.cache.write().expect("token cache lock poisoned");
        cache.retain(|_, token| !expired(token));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cache.read().unwrap().len()
    }
}

fn expired(token: &TokenRequest) -> bool {
    match &token.status {
        Some(status) => Utc::now() > status.expiration_timestamp.0,
        None => true,
    }
}

/// A token requires a refresh once it is within `20% of TTL + jitter` of its
/// expiration, or older than 24 hours minus jitter.
fn requires_refresh(token: &TokenRequest) -> bool {
    let Some(status) = &token.status else {
        return true;
    };
    let Some(expiration_seconds) = token.spec.expiration_seconds else {
        warn!("Expiration seconds was nil for cached token request");
        return false;
    };

    let now = Utc::now();
    let exp = status.expiration_timestamp.0;
    let iat = exp - chrono::Duration::seconds(expiration_seconds);

    let jitter = chrono::Duration::milliseconds(
        (rand::thread_rng().gen_range(0.0..MAX_JITTER_SECONDS) * 1000.0) as i64,
    );
    if now > iat + (chrono::Duration::seconds(MAX_TTL_SECONDS) - jitter) {
        return true;
    }
    // Refresh when within 20% of the TTL plus jitter of the expiration time.
    now > exp - chrono::Duration::seconds(expiration_seconds * 20 / 100) - jitter
}

/// Cache keys are nonconfidential and safe to log.
fn cache_key(name: &str, namespace: &str, request: &TokenRequest) -> String {
    let exp = request.spec.expiration_seconds.unwrap_or(0);
    format!(
        "{:?}/{:?}/{:?}/{:?}/{:?}",
        name, namespace, request.spec.audiences, exp, request.spec.bound_object_ref
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Issuer returning a scripted sequence of results.
    struct ScriptedIssuer {
        responses: Mutex<Vec<Result<TokenRequest, TokenError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedIssuer {
        fn new(responses: Vec<Result<TokenRequest, TokenError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenIssuer for ScriptedIssuer {
        async fn issue(
            &self,
            _namespace: &str,
            _name: &str,
            _request: &TokenRequest,
        ) -> Result<TokenRequest, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(fetch_error());
            }
            responses.remove(0)
        }
    }

    fn fetch_error() -> TokenError {
        TokenError::Fetch(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "scripted".into(),
            reason: "scripted".into(),
            code: 500,
        }))
    }

    fn token(expires_in_seconds: i64, expiration_seconds: i64) -> TokenRequest {
        TokenRequest {
            spec: TokenRequestSpec {
                audiences: vec!["aud".into()],
                expiration_seconds: Some(expiration_seconds),
                ..Default::default()
            },
            status: Some(TokenRequestStatus {
                token: "tok".into(),
                expiration_timestamp: Time(
                    Utc::now() + chrono::Duration::seconds(expires_in_seconds),
                ),
            }),
            ..Default::default()
        }
    }

    fn request() -> TokenRequest {
        TokenRequest {
            spec: TokenRequestSpec {
                audiences: vec!["aud".into()],
                expiration_seconds: Some(3600),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cache_hit_avoids_second_issue() {
        // Expires well outside the refresh window, even with max jitter.
        let cache = TokenCache::new(Box::new(ScriptedIssuer::new(vec![Ok(token(3600, 3600))])));

        cache.get_token("ns", "sa", &request()).await.unwrap();
        let second = cache.get_token("ns", "sa", &request()).await.unwrap();

        assert_eq!(second.status.unwrap().token, "tok");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_returns_valid_cached_token() {
        // First token is inside the refresh window (60s left of a 3600s TTL)
        // but still valid, so a failed refresh falls back to it.
        let cache = TokenCache::new(Box::new(ScriptedIssuer::new(vec![
            Ok(token(60, 3600)),
            Err(fetch_error()),
        ])));

        cache.get_token("ns", "sa", &request()).await.unwrap();
        let fallback = cache.get_token("ns", "sa", &request()).await.unwrap();

        assert_eq!(fallback.status.unwrap().token, "tok");
    }

    #[tokio::test]
    async fn test_refresh_failure_with_expired_token_errors() {
        let cache = TokenCache::new(Box::new(ScriptedIssuer::new(vec![
            Ok(token(-10, 3600)),
            Err(fetch_error()),
        ])));

        cache.get_token("ns", "sa", &request()).await.unwrap();
        let err = cache.get_token("ns", "sa", &request()).await.unwrap_err();

        assert!(matches!(err, TokenError::ExpiredAndRefreshFailed { .. }));
    }

    #[tokio::test]
    async fn test_miss_propagates_endpoint_error() {
        let cache = TokenCache::new(Box::new(ScriptedIssuer::new(vec![Err(
            TokenError::EndpointNotEnabled,
        )])));

        let err = cache.get_token("ns", "sa", &request()).await.unwrap_err();

        assert!(matches!(err, TokenError::EndpointNotEnabled));
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let cache = TokenCache::new(Box::new(ScriptedIssuer::new(vec![Ok(token(-10, 3600))])));

        cache.get_token("ns", "sa", &request()).await.unwrap();
        assert_eq!(cache.len(), 1);

        cache.sweep();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_distinct_audiences_get_distinct_entries() {
        let issuer = ScriptedIssuer::new(vec![Ok(token(3600, 3600)), Ok(token(3600, 3600))]);
        let cache = TokenCache::new(Box::new(issuer));

        let mut request_b = request();
        request_b.spec.audiences = vec!["other".into()];

        cache.get_token("ns", "sa", &request()).await.unwrap();
        cache.get_token("ns", "sa", &request_b).await.unwrap();

        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_provider_token_attrs_empty_audiences() {
        let issuer = ScriptedIssuer::new(vec![]);
        let cache = TokenCache::new(Box::new(issuer));

        let attrs = cache.provider_token_attrs("ns", "sa", &[]).await.unwrap();

        assert!(attrs.is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_provider_token_attrs_bundle_shape() {
        let issuer = ScriptedIssuer::new(vec![Ok(token(3600, 600)), Ok(token(3600, 600))]);
        let cache = TokenCache::new(Box::new(issuer));

        let audiences = vec!["api".to_string(), "vault".to_string()];
        let (key, value) = cache
            .provider_token_attrs("ns", "sa", &audiences)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(key, SERVICE_ACCOUNT_TOKENS_ATTRIBUTE);
        let parsed: serde_json::Value = serde_json::from_str(&value).unwrap();
        assert_eq!(parsed["api"]["token"], "tok");
        assert!(parsed["vault"]["expirationTimestamp"].is_string());
    }

    #[tokio::test]
    async fn test_each_audience_issues_once() {
        let issuer = Arc::new(ScriptedIssuer::new(vec![
            Ok(token(3600, 600)),
            Ok(token(3600, 600)),
        ]));

        struct Shared(Arc<ScriptedIssuer>);

        #[async_trait]
        impl TokenIssuer for Shared {
            async fn issue(
                &self,
                namespace: &str,
                name: &str,
                request: &TokenRequest,
            ) -> Result<TokenRequest, TokenError> {
                self.0.issue(namespace, name, request).await
            }
        }

        let cache = TokenCache::new(Box::new(Shared(Arc::clone(&issuer))));
        let audiences = vec!["api".to_string(), "vault".to_string()];

        cache
            .provider_token_attrs("ns", "sa", &audiences)
            .await
            .unwrap();

        assert_eq!(issuer.calls(), 2);
    }
}
