//! LeaseKeeper - Lease-Based Leader Election
//!
//! Runs one replica contending for a shared lease, or the coordination
//! server replicas on different hosts contend through.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leasekeeper::api::HttpServer;
use leasekeeper::config::{BackendKind, LeaseKeeperConfig};
use leasekeeper::election::{ElectionClient, LeaderCallbacks};
use leasekeeper::error::{Error, Result};
use leasekeeper::lock::{self, LeaseKey, LeaseLock, VersionedRecord};

/// LeaseKeeper - Lease-Based Leader Election
#[derive(Parser)]
#[command(name = "leasekeeper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "leasekeeper.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Contend for the lease and run leader work while holding it
    Run {
        /// Holder identity (defaults to the config file, then a random UUID)
        #[arg(long)]
        id: Option<String>,

        /// Lease lock name
        #[arg(long)]
        lease_lock_name: Option<String>,

        /// Lease lock namespace
        #[arg(long)]
        lease_lock_namespace: Option<String>,
    },

    /// Start the coordination server
    Serve {
        /// Address to listen on (overrides server.bind_address)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Show lease records held by the configured store
    Status {
        /// Coordination server to query (overrides the configured store)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Show every lease instead of the configured one
        #[arg(long)]
        all: bool,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "leasekeeper.toml")]
        output: PathBuf,

        /// Holder identity (random UUID when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Lease lock name
        #[arg(long, default_value = "example")]
        lease_lock_name: String,

        /// Lease lock namespace
        #[arg(long, default_value = "default")]
        lease_lock_namespace: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            id,
            lease_lock_name,
            lease_lock_namespace,
        } => {
            let mut config = load_or_default(&cli.config)?;
            if let Some(id) = id {
                config.node.identity = id;
            }
            if let Some(name) = lease_lock_name {
                config.lease.name = name;
            }
            if let Some(namespace) = lease_lock_namespace {
                config.lease.namespace = namespace;
            }
            init_logging(
                cli.log_level.as_deref().unwrap_or(&config.logging.level),
                &config.logging.format,
            );
            run_contender(config).await
        }
        Commands::Serve { listen } => {
            let mut config = load_or_default(&cli.config)?;
            if let Some(listen) = listen {
                config.server.bind_address = listen;
            }
            init_logging(
                cli.log_level.as_deref().unwrap_or(&config.logging.level),
                &config.logging.format,
            );
            run_serve(config).await
        }
        Commands::Status { endpoint, all } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "compact");
            let mut config = load_or_default(&cli.config)?;
            if let Some(endpoint) = endpoint {
                config.store.backend = BackendKind::Http;
                config.store.endpoint = endpoint;
            }
            run_status(config, all).await
        }
        Commands::Init {
            output,
            id,
            lease_lock_name,
            lease_lock_namespace,
        } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            run_init(output, &id, &lease_lock_name, &lease_lock_namespace)
        }
        Commands::Validate => run_validate(&cli.config),
    }
}

fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the config file, falling back to defaults when it does not exist.
/// Command-line overrides are applied by the caller before validation.
fn load_or_default(path: &Path) -> Result<LeaseKeeperConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(toml::from_str(&content)?)
}

/// Cancel `token` on SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("Received termination, signaling shutdown");
        token.cancel();
    });
}

/// Placeholder leader work: reports progress until its scope is cancelled
struct ControllerLoop {
    identity: String,
    exit_on_lost_leadership: bool,
    shutdown: CancellationToken,
}

#[async_trait]
impl LeaderCallbacks for ControllerLoop {
    async fn on_started_leading(&self, scope: CancellationToken) {
        tracing::info!("Controller loop...");

        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    tracing::debug!("Controller loop still running as {}", self.identity);
                }
            }
        }

        tracing::info!("Controller loop stopped");
    }

    async fn on_stopped_leading(&self) {
        tracing::info!("leader lost: {}", self.identity);
        if self.exit_on_lost_leadership {
            self.shutdown.cancel();
        }
    }

    async fn on_new_leader(&self, identity: &str) {
        if identity == self.identity {
            return;
        }
        tracing::info!("new leader elected: {}", identity);
    }
}

/// Contend for the configured lease until shutdown or lost leadership
async fn run_contender(config: LeaseKeeperConfig) -> Result<()> {
    config.validate()?;
    config.validate_lease()?;

    let election = config.election_config()?;
    let key = config.lease_key();
    let backend = lock::open_backend(&config)?;
    let store = Arc::new(LeaseLock::new(backend, key.clone()));

    tracing::info!(
        "Starting LeaseKeeper replica {} for lease {} ({} store)",
        config.node.identity,
        key,
        config.store.backend
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let callbacks = Arc::new(ControllerLoop {
        identity: config.node.identity.clone(),
        exit_on_lost_leadership: config.node.exit_on_lost_leadership,
        shutdown: shutdown.clone(),
    });

    let client = ElectionClient::new(election, store, callbacks);
    let mut states = client.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::debug!("Election state: {}", state);
        }
    });

    match client.run(shutdown).await {
        Ok(()) => {
            tracing::info!("LeaseKeeper replica stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Election stopped on unrecoverable error: {}", e);
            Err(e)
        }
    }
}

/// Start the coordination server
async fn run_serve(config: LeaseKeeperConfig) -> Result<()> {
    config.validate()?;

    let backend = lock::open_server_backend(&config)?;
    tracing::info!(
        "Starting coordination server on {} ({} backend)",
        config.server.bind_address,
        config.server.backend
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    HttpServer::new(config.server, backend).start(shutdown).await
}

fn print_lease(key: &LeaseKey, versioned: &VersionedRecord) {
    let record = &versioned.record;
    let now = Utc::now();
    let expired = record.is_expired(now, Duration::from_secs(record.lease_duration_seconds));
    let holder = if record.is_held() {
        record.holder_identity.as_str()
    } else {
        "(released)"
    };

    println!("Lease {}", key);
    println!("  Holder:       {}", holder);
    println!("  Duration:     {}s", record.lease_duration_seconds);
    println!("  Acquired:     {}", record.acquire_time.to_rfc3339());
    println!("  Renewed:      {}", record.renew_time.to_rfc3339());
    println!("  Transitions:  {}", record.leader_transitions);
    println!("  Version:      {}", versioned.version);
    println!("  Expired:      {}", if expired { "yes" } else { "no" });
}

/// Show lease records
async fn run_status(config: LeaseKeeperConfig, all: bool) -> Result<()> {
    config.validate()?;
    if config.store.backend == BackendKind::Memory {
        return Err(Error::Config(
            "status needs a shared store (http or sqlite)".into(),
        ));
    }
    let backend = lock::open_backend(&config)?;

    if all {
        let leases = backend.list().await?;
        if leases.is_empty() {
            println!("No leases");
        }
        for (key, versioned) in &leases {
            print_lease(key, versioned);
        }
        return Ok(());
    }

    config.validate_lease()?;
    let key = config.lease_key();
    match backend.get(&key).await? {
        Some(versioned) => print_lease(&key, &versioned),
        None => println!("Lease {} does not exist", key),
    }
    Ok(())
}

/// Initialize configuration file
fn run_init(output: PathBuf, id: &str, name: &str, namespace: &str) -> Result<()> {
    let content = LeaseKeeperConfig::sample(id, name, namespace);
    std::fs::write(&output, content)?;
    println!("Configuration written to {:?}", output);
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: &Path) -> Result<()> {
    let checked = LeaseKeeperConfig::from_file(config_path)
        .and_then(|config| config.validate_lease().map(|_| config));

    match checked {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Identity:       {}", config.node.identity);
            println!("  Lease:          {}", config.lease_key());
            println!(
                "  Timing:         lease {}ms, renew deadline {}ms, retry {}ms",
                config.election.lease_duration_ms,
                config.election.renew_deadline_ms,
                config.election.retry_period_ms
            );
            println!("  Release on cancel: {}", config.election.release_on_cancel);
            println!("  Store:          {}", config.store.backend);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
