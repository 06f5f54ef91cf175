//! # Plugin Client Pool
//!
//! Builds and stores gRPC clients for communicating with provider plugins.
//! Plugin servers must listen on the unix domain socket at
//! `<dir>/<plugin_name>.sock` where `<plugin_name>` matches the validation
//! regex. Connections are dialed lazily, reused for the lifetime of the
//! controller, and retried on UNAVAILABLE with bounded exponential backoff.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use prost::Message;
use regex::Regex;
use thiserror::Error;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Code;
use tower::service_fn;
use tracing::{debug, error, warn};

use super::grpc::v1alpha1::csi_driver_provider_client::CsiDriverProviderClient;
use super::grpc::v1alpha1::{
    MountRequest, MountResponse, ObjectVersion, VersionRequest, VersionResponse,
};

/// Mount target path sent to plugins. The controller never mounts a
/// filesystem; the value only satisfies the plugin request contract.
const TARGET_PATH: &str = "/mnt/secrets-store";

/// Serialized octal 0644, the fixed file permission sent to plugins.
const PERMISSION: u32 = 0o644;

/// Provider API version spoken on both RPCs.
const PROVIDER_API_VERSION: &str = "v1alpha1";

/// Individual Kubernetes secrets are limited to 1MiB; responses larger than
/// this are likely to be rejected at apply time.
const RESPONSE_SIZE_WARNING_BYTES: usize = 1 << 20;

/// Per-probe timeout of the periodic plugin health check.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

// Retry schedule for RPCs failing with UNAVAILABLE while the plugin socket
// is not ready yet.
const RETRY_MAX_ATTEMPTS: u32 = 3;
const RETRY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(10);
const RETRY_BACKOFF_MULTIPLIER: f64 = 1.1;

static PLUGIN_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[a-zA-Z0-9_-]{0,30}$").expect("plugin name regex is valid"));

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid provider: provider {0:?}")]
    InvalidProvider(String),

    #[error("provider not found: provider {0:?}")]
    ProviderNotFound(String),

    #[error("failed to construct plugin endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider mount call failed: {0}")]
    Rpc(#[source] tonic::Status),

    #[error("mount request failed with provider error code {code}")]
    Provider { code: String },

    #[error("missing object versions in mount response")]
    MissingObjectVersions,

    #[error("failed to serialize mount request field: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Capability surface of a provider plugin. Production clients speak gRPC;
/// tests inject mocks.
#[async_trait]
pub trait ProviderClient: Send + Sync + std::fmt::Debug {
    async fn mount(&self, request: MountRequest) -> Result<MountResponse, tonic::Status>;
    async fn version(&self, request: VersionRequest) -> Result<VersionResponse, tonic::Status>;
}

/// gRPC-backed plugin client with UNAVAILABLE retry.
#[derive(Debug)]
struct GrpcProviderClient {
    inner: CsiDriverProviderClient<Channel>,
}

impl GrpcProviderClient {
    fn new(channel: Channel, max_recv_message_size: usize) -> Self {
        Self {
            inner: CsiDriverProviderClient::new(channel)
                .max_decoding_message_size(max_recv_message_size),
        }
    }
}

/// Run an RPC, retrying on UNAVAILABLE with bounded exponential backoff.
async fn retry_unavailable<T, F, Fut>(mut call: F) -> Result<T, tonic::Status>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, tonic::Status>>,
{
    let mut backoff = RETRY_INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(response) => return Ok(response),
            Err(status) if status.code() == Code::Unavailable && attempt < RETRY_MAX_ATTEMPTS => {
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, "plugin unavailable, retrying");
                tokio::time::sleep(backoff).await;
                backoff = backoff.mul_f64(RETRY_BACKOFF_MULTIPLIER).min(RETRY_MAX_BACKOFF);
                attempt += 1;
            }
            Err(status) => return Err(status),
        }
    }
}

#[async_trait]
impl ProviderClient for GrpcProviderClient {
    async fn mount(&self, request: MountRequest) -> Result<MountResponse, tonic::Status> {
        retry_unavailable(|| {
            let mut client = self.inner.clone();
            let request = request.clone();
            async move { Ok(client.mount(request).await?.into_inner()) }
        })
        .await
    }

    async fn version(&self, request: VersionRequest) -> Result<VersionResponse, tonic::Status> {
        retry_unavailable(|| {
            let mut client = self.inner.clone();
            let request = request.clone();
            async move { Ok(client.version(request).await?.into_inner()) }
        })
        .await
    }
}

/// Pool of provider plugin clients keyed by provider name.
pub struct PluginClientPool {
    socket_dirs: Vec<PathBuf>,
    max_recv_message_size: usize,
    clients: RwLock<HashMap<String, Arc<dyn ProviderClient>>>,
}

impl PluginClientPool {
    pub fn new(socket_dirs: Vec<PathBuf>, max_recv_message_size: usize) -> Self {
        Self {
            socket_dirs,
            max_recv_message_size,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Return the client for a provider, dialing its socket on first use.
    pub fn get(&self, provider: &str) -> Result<Arc<dyn ProviderClient>, PoolError> {
        {
            let clients = self.clients.read().expect("plugin pool lock poisoned");
            if let Some(client) = clients.get(provider) {
                return Ok(Arc::clone(client));
            }
        }

        if !PLUGIN_NAME_RE.is_match(provider) {
            return Err(PoolError::InvalidProvider(provider.to_string()));
        }

        let socket_path = self
            .socket_dirs
            .iter()
            .map(|dir| dir.join(format!("{provider}.sock")))
            .find(|path| path.exists())
            .ok_or_else(|| PoolError::ProviderNotFound(provider.to_string()))?;

        // The URI is required by the endpoint builder but never resolved;
        // the connector dials the unix socket instead.
        let channel = Endpoint::try_from("http://[::1]:50051")?.connect_with_connector_lazy(
            service_fn(move |_: Uri| {
                let path = socket_path.clone();
                async move {
                    Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?))
                }
            }),
        );
        let client: Arc<dyn ProviderClient> =
            Arc::new(GrpcProviderClient::new(channel, self.max_recv_message_size));

        let mut clients = self.clients.write().expect("plugin pool lock poisoned");
        // Another task may have dialed the same provider between the read
        // and write lock; keep the first connection.
        let entry = clients
            .entry(provider.to_string())
            .or_insert_with(|| Arc::clone(&client));
        Ok(Arc::clone(entry))
    }

    /// Drop all pooled clients, closing their connections.
    pub fn cleanup(&self) {
        let mut clients = self.clients.write().expect("plugin pool lock poisoned");
        clients.clear();
    }

    /// Periodic liveness probe of all pooled plugins via `Version()`.
    ///
    /// Runs until cancelled by dropping the task; probe failures are logged,
    /// never fatal.
    pub async fn health_check(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot: Vec<(String, Arc<dyn ProviderClient>)> = {
                let clients = self.clients.read().expect("plugin pool lock poisoned");
                clients
                    .iter()
                    .map(|(name, client)| (name.clone(), Arc::clone(client)))
                    .collect()
            };

            for (provider, client) in snapshot {
                let probe = version(client.as_ref());
                match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe).await {
                    Ok(Ok(runtime_version)) => {
                        debug!(provider, runtime_version, "provider healthcheck successful");
                    }
                    Ok(Err(err)) => {
                        debug!(provider, error = %err, "provider healthcheck failed");
                    }
                    Err(_) => {
                        debug!(provider, "provider healthcheck timed out");
                    }
                }
            }
        }
    }
}

/// Call the plugin's `Mount()` RPC with helpers to format the request and
/// interpret the response. Returns the observed object versions and the
/// file map.
#[allow(clippy::implicit_hasher)]
pub async fn mount_content(
    client: &dyn ProviderClient,
    attributes: String,
    secrets: String,
    old_object_versions: &BTreeMap<String, String>,
) -> Result<(BTreeMap<String, String>, HashMap<String, Vec<u8>>), ProviderError> {
    let current_object_version = old_object_versions
        .iter()
        .map(|(id, version)| ObjectVersion {
            id: id.clone(),
            version: version.clone(),
        })
        .collect();

    let request = MountRequest {
        attributes,
        secrets,
        permission: serde_json::to_string(&PERMISSION)?,
        current_object_version,
        target_path: TARGET_PATH.to_string(),
    };

    let response = client.mount(request).await.map_err(|status| {
        if is_max_recv_msg_size_error(&status) {
            error!(
                error = %status,
                "Set --max-call-recv-msg-size to configure larger maximum size in bytes of gRPC response"
            );
        }
        ProviderError::Rpc(status)
    })?;
    debug!("finished mount request");

    if let Some(provider_error) = &response.error {
        if !provider_error.code.is_empty() {
            return Err(ProviderError::Provider {
                code: provider_error.code.clone(),
            });
        }
    }

    if response.object_version.is_empty() {
        return Err(ProviderError::MissingObjectVersions);
    }
    let object_versions = response
        .object_version
        .iter()
        .map(|ov| (ov.id.clone(), ov.version.clone()))
        .collect();

    // Individual k8s secrets are limited to 1MiB in size.
    let size = response.encoded_len();
    if size > RESPONSE_SIZE_WARNING_BYTES {
        warn!(size, "mount response above 1MiB, secret sync may fail");
    }

    let files = response
        .files
        .into_iter()
        .map(|file| (file.path, file.contents))
        .collect();

    Ok((object_versions, files))
}

/// Call the plugin's `Version()` RPC, returning the plugin runtime version.
pub async fn version(client: &dyn ProviderClient) -> Result<String, tonic::Status> {
    let response = client
        .version(VersionRequest {
            version: PROVIDER_API_VERSION.to_string(),
        })
        .await?;
    Ok(response.runtime_version)
}

/// ResourceExhausted can also carry quota errors; only the internal message
/// size overflow should point operators at the size flag.
fn is_max_recv_msg_size_error(status: &tonic::Status) -> bool {
    if status.code() != Code::ResourceExhausted {
        return false;
    }
    let message = status.message();
    if message.contains("received message larger than max length allowed on current machine") {
        return false;
    }
    message.contains("received message larger than max")
}
