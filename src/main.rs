use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use relaymq_k8s::{
    controller::{self, WatchNamespaces},
    crd::RelayBroker,
    drain::{DrainConfig, DrainRegistry},
    Error,
};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show cluster information
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Comma-separated namespaces to reconcile; empty watches the cluster
    #[arg(long, env = "WATCH_NAMESPACES", default_value = "")]
    watch_namespaces: String,

    /// Watch only the operator's own namespace
    #[arg(long, env = "LOCAL_ONLY")]
    local_only: bool,

    /// Take a leader election lease before running controllers
    #[arg(long, env = "ENABLE_LEADER_ELECTION")]
    enable_leader_election: bool,

    /// Namespace holding the leader election lease
    #[arg(long, env = "LEASE_NAMESPACE", default_value = "default")]
    lease_namespace: String,

    /// Bind address reserved for the metrics endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Management API port on every broker pod
    #[arg(long, env = "DRAIN_MANAGEMENT_PORT", default_value_t = 8161)]
    drain_management_port: i32,

    /// Seconds between drain backlog polls
    #[arg(long, env = "DRAIN_POLL_SECONDS", default_value_t = 10)]
    drain_poll_seconds: u64,

    /// Unsuccessful drain steps tolerated before a drain is parked
    #[arg(long, env = "DRAIN_MAX_ATTEMPTS", default_value_t = 30)]
    drain_max_attempts: u32,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Namespace to inspect
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("RelayMQ-K8s Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            return Ok(());
        }
        Commands::Info(info_args) => {
            return run_info(info_args).await;
        }
        Commands::Run(run_args) => {
            return run_operator(run_args).await;
        }
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: kube::Api<RelayBroker> = kube::Api::namespaced(client, &args.namespace);
    let brokers = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Managed RelayBroker fleets: {}", brokers.items.len());
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    // Initialize tracing with OpenTelemetry
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true);

    // Register the subscriber with both stdout logging and OpenTelemetry tracing
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    // Only enable OTEL if an endpoint is provided
    match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => {
            let otel_layer = relaymq_k8s::telemetry::otel_layer(&endpoint)?;
            registry.with(otel_layer).init();
            info!("OpenTelemetry tracing initialized");
        }
        Err(_) => {
            registry.init();
            info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
        }
    }

    info!(
        "Starting RelayMQ-K8s Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let watch_namespaces = if args.local_only {
        let own = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        info!("Local-only mode, watching namespace {}", own);
        WatchNamespaces::parse(&own)
    } else {
        WatchNamespaces::parse(&args.watch_namespaces)
    };
    if watch_namespaces.watches_all() {
        info!("Watching all namespaces");
    }

    info!(
        "Metrics address {} reserved, no exporter is served yet",
        args.metrics_addr
    );

    // Leader election configuration
    let is_leader = Arc::new(AtomicBool::new(!args.enable_leader_election));

    if args.enable_leader_election {
        let leader_namespace =
            std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.lease_namespace.clone());
        let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        });

        info!("Leader election using holder ID: {}", holder_identity);

        let lease_client = client.clone();
        let is_leader_bg = Arc::clone(&is_leader);

        tokio::spawn(async move {
            run_leader_election(lease_client, &leader_namespace, &holder_identity, is_leader_bg)
                .await;
        });

        // Controllers only run on the leader; wait for the lease
        while !is_leader.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    let drain_config = DrainConfig {
        management_port: args.drain_management_port,
        poll_interval: Duration::from_secs(args.drain_poll_seconds),
        max_attempts: args.drain_max_attempts,
        ..DrainConfig::default()
    };

    // Create shared controller state
    let state = Arc::new(controller::ControllerState {
        client: client.clone(),
        watch_namespaces,
        drain: Arc::new(DrainRegistry::new(client, drain_config)),
    });

    // Run the main controller loops
    let result = controller::run_controllers(state).await;

    // Flush any remaining traces
    relaymq_k8s::telemetry::shutdown_telemetry();

    result
}

const LEASE_NAME: &str = "relaymq-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

async fn run_leader_election(
    client: kube::Client,
    namespace: &str,
    identity: &str,
    is_leader: Arc<AtomicBool>,
) {
    let leases: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        match try_acquire_or_renew(&leases, identity).await {
            Ok(true) => {
                if !is_leader.load(Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(true, Ordering::Relaxed);
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
            Ok(false) => {
                if is_leader.load(Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

async fn try_acquire_or_renew(leases: &Api<Lease>, identity: &str) -> Result<bool, kube::Error> {
    let now = Utc::now();

    match leases.get(LEASE_NAME).await {
        Ok(existing) => {
            let spec = existing.spec.as_ref();
            let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

            if current_holder == Some(identity) {
                let patch = serde_json::json!({
                    "spec": {
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                return Ok(true);
            }

            let expired = spec
                .and_then(|s| s.renew_time.as_ref())
                .map(|renew| {
                    let duration = spec
                        .and_then(|s| s.lease_duration_seconds)
                        .unwrap_or(LEASE_DURATION_SECS);
                    let expiry = renew.0 + chrono::Duration::seconds(duration as i64);
                    now > expiry
                })
                .unwrap_or(true);

            if expired {
                info!(
                    "Lease held by {:?} has expired, taking over",
                    current_holder
                );
                let patch = serde_json::json!({
                    "spec": {
                        "holderIdentity": identity,
                        "acquireTime": MicroTime(now),
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    namespace: Some(namespace_of(leases)),
                    ..Default::default()
                },
                spec: Some(k8s_openapi::api::coordination::v1::LeaseSpec {
                    holder_identity: Some(identity.to_string()),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_duration_seconds: Some(LEASE_DURATION_SECS),
                    ..Default::default()
                }),
            };
            leases.create(&PostParams::default(), &lease).await?;
            info!("Created lease {} with holder {}", LEASE_NAME, identity);
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

fn namespace_of(leases: &Api<Lease>) -> String {
    leases
        .resource_url()
        .split('/')
        .nth(5)
        .unwrap_or("default")
        .to_string()
}
