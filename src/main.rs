//! # Controller Bootstrap
//!
//! Wires the pieces together: configuration, logging, metrics, probe and
//! metrics servers, the plugin client pool with its health probe, the token
//! cache sweeper, optional leader election and the `SecretSync` controller
//! loop.
//!
//! Exits 0 on clean shutdown, 1 on fatal initialization errors or a lost
//! leader lease.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Config as ControllerConfig, Controller};
use kube::runtime::events::{Recorder, Reporter};
use kube::runtime::watcher;
use kube::{Client, CustomResourceExt};
use tracing::{debug, error, info};

use secrets_store_sync_controller::controller::{
    error_policy, reconcile, Context, PodIdentity,
};
use secrets_store_sync_controller::crd::SecretSync;
use secrets_store_sync_controller::leader::LeaderElector;
use secrets_store_sync_controller::observability::metrics;
use secrets_store_sync_controller::provider::PluginClientPool;
use secrets_store_sync_controller::server::{start_metrics_server, start_probe_server, ServerState};
use secrets_store_sync_controller::token::{KubeTokenIssuer, TokenCache};

/// Component tag stamped on emitted Kubernetes Events.
const EVENT_COMPONENT: &str = "secret-sync-controller";

/// Interval between plugin liveness probes.
const PROVIDER_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(120);

/// Secrets Store Sync Controller
#[derive(Parser)]
#[command(name = "secrets-store-sync-controller", version, about)]
struct Opts {
    /// The address the metrics endpoint binds to
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8085")]
    metrics_bind_address: String,

    /// The address the health and readiness probes bind to
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    health_probe_bind_address: String,

    /// Directory searched for provider plugin sockets; repeat for multiple
    /// directories, first match wins
    #[arg(long = "provider-volume", env = "PROVIDER_VOLUME_PATH", default_value = "/provider")]
    provider_volume: Vec<PathBuf>,

    /// Audience for the token request, comma separated
    #[arg(long, env = "TOKEN_REQUEST_AUDIENCE", default_value = "")]
    token_request_audience: String,

    /// Maximum size in bytes of gRPC response from plugins
    #[arg(long, env = "MAX_CALL_RECV_MSG_SIZE", default_value_t = 4 * 1024 * 1024)]
    max_call_recv_msg_size: usize,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "SYNC_WORKERS", default_value_t = 1)]
    workers: u16,

    /// Enable leader election so only one replica reconciles
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    leader_elect: bool,

    /// Namespace holding the leader election lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "kube-system")]
    leader_election_namespace: String,

    /// Print the SecretSync CRD manifest and exit
    #[arg(long)]
    crds: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = ?err, "Controller failed");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let opts = Opts::parse();

    if opts.crds {
        print!("{}", serde_yaml::to_string(&SecretSync::crd())?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secrets_store_sync_controller=info".into()),
        )
        .init();

    info!("Starting Secrets Store Sync Controller");

    metrics::register_metrics()?;

    let server_state = ServerState::new();
    {
        let state = Arc::clone(&server_state);
        let addr = opts.health_probe_bind_address.clone();
        tokio::spawn(async move {
            if let Err(e) = start_probe_server(&addr, state).await {
                error!("Probe server error: {}", e);
            }
        });
    }
    {
        let addr = opts.metrics_bind_address.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&addr).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig or in-cluster config is available.")?;

    let token_cache = Arc::new(TokenCache::new(Box::new(KubeTokenIssuer::new(
        client.clone(),
    ))));
    token_cache.spawn_sweeper();

    let providers = Arc::new(PluginClientPool::new(
        opts.provider_volume.clone(),
        opts.max_call_recv_msg_size,
    ));
    tokio::spawn(Arc::clone(&providers).health_check(PROVIDER_HEALTH_CHECK_INTERVAL));

    let audiences: Vec<String> = opts
        .token_request_audience
        .split(',')
        .map(str::trim)
        .filter(|audience| !audience.is_empty())
        .map(str::to_string)
        .collect();

    let recorder = Recorder::new(
        client.clone(),
        Reporter {
            controller: EVENT_COMPONENT.to_string(),
            instance: None,
        },
    );

    let context = Arc::new(Context::new(
        client.clone(),
        audiences,
        Arc::clone(&token_cache),
        Arc::clone(&providers),
        recorder,
        PodIdentity::from_env(),
    ));

    // With leader election enabled, block here until this replica holds
    // the lease. A lost lease is fatal: a stale leader must never keep
    // writing Secrets.
    if opts.leader_elect {
        let identity = leader_identity();
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &opts.leader_election_namespace,
            &identity,
        ));
        let mut guard = elector.acquire().await?;
        tokio::spawn(async move {
            guard.lost().await;
            error!("leader election lost");
            std::process::exit(1);
        });
    }

    server_state.set_ready();

    let secret_syncs: Api<SecretSync> = Api::all(client.clone());
    Controller::new(secret_syncs, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(opts.workers))
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::clone(&context))
        .for_each(|result| async move {
            match result {
                Ok(obj) => debug!(object = ?obj, "Reconciled"),
                // Failures are logged and counted in the error policy.
                Err(_) => {}
            }
        })
        .await;

    providers.cleanup();
    info!("Controller stopped");

    Ok(())
}

/// Pod hostname plus a random uniquifier, so two processes on the same
/// host never share a leader identity.
fn leader_identity() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "secrets-store-sync".to_string());
    format!("{hostname}_{:08x}", rand::random::<u64>())
}
