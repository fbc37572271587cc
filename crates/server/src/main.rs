use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use strongbox_core::{ArtifactRoot, ExportFormat, OwnerId};
use strongbox_server::api::{AppState, ListLimits};
use strongbox_server::auth::AuthProvider;
use strongbox_server::auth::api_key::hash_api_key;
use strongbox_server::catalog_factory::create_catalog;
use strongbox_server::config::{CatalogBackend, StrongboxConfig};
use strongbox_server::gate::DownloadGate;
use strongbox_server::lifecycle::LifecycleCoordinator;

/// Strongbox export artifact server.
#[derive(Parser, Debug)]
#[command(
    name = "strongbox-server",
    about = "Serve, register and reconcile data export artifacts"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "strongbox.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (the default).
    Serve,
    /// Catalogue a finished artifact directory for its owner.
    Register {
        /// Owner the artifact belongs to.
        #[arg(long)]
        owner: String,
        /// Artifact directory, `{root}/{owner}/{timestamp}`.
        #[arg(long)]
        dir: PathBuf,
        /// Record format, required when the directory has no manifest.json.
        #[arg(long)]
        format: Option<ExportFormat>,
    },
    /// Remove catalog rows whose artifact directory no longer exists.
    Reconcile {
        /// Only check this owner's rows.
        #[arg(long)]
        owner: Option<String>,
    },
    /// Print the SHA-256 digest of an API key read from stdin, for `[[auth.api_keys]]`.
    HashKey,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::HashKey) = cli.command {
        let mut raw = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut raw)?;
        println!("{}", hash_api_key(raw.trim_end_matches(['\r', '\n'])));
        return Ok(());
    }

    let config_path = Path::new(&cli.config);
    let config = StrongboxConfig::load(config_path)?;
    config.validate()?;

    match cli.command {
        Some(Commands::Register { owner, dir, format }) => {
            strongbox_server::telemetry::init_cli();
            warn_if_ephemeral(&config);
            let coordinator = build_coordinator(&config, false).await?;
            let dir = std::path::absolute(dir)?;
            let artifact = coordinator
                .register(&OwnerId::new(owner), &dir, format)
                .await?;
            println!("{}", artifact.id);
            Ok(())
        }
        Some(Commands::Reconcile { owner }) => {
            strongbox_server::telemetry::init_cli();
            warn_if_ephemeral(&config);
            let coordinator = build_coordinator(&config, false).await?;
            let owner = owner.map(OwnerId::new);
            let removed = coordinator.reconcile(owner.as_ref()).await?;
            info!(removed = removed.len(), "reconcile complete");
            for id in removed {
                println!("{id}");
            }
            Ok(())
        }
        Some(Commands::Serve) | None => serve(cli.host, cli.port, config_path, config).await,
        Some(Commands::HashKey) => Ok(()),
    }
}

async fn serve(
    host: Option<String>,
    port: Option<u16>,
    config_path: &Path,
    config: StrongboxConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    // Must happen after config is loaded so we know whether OTel is enabled,
    // but before any tracing calls.
    let telemetry_guard = strongbox_server::telemetry::init(&config.telemetry);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "config file not found, using defaults"
        );
    }
    if config.auth.api_keys.is_empty() && config.auth.trusted_identity_header.is_none() {
        warn!("no API keys or trusted identity header configured; every export request will be rejected");
    }

    let coordinator = build_coordinator(&config, true).await?;
    let gate = coordinator.gate().clone();

    let state = AppState {
        coordinator,
        auth: Arc::new(AuthProvider::from_config(&config.auth)),
        limits: ListLimits {
            default_page_size: config.artifacts.default_page_size,
            max_page_size: config.artifacts.max_page_size,
        },
        retry_after_seconds: config.artifacts.retry_after_seconds,
    };
    let app = strongbox_server::api::router(state);

    // Resolve the bind address (CLI overrides take precedence).
    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "strongbox-server listening");

    // Serve with graceful shutdown on SIGINT / SIGTERM. Open downloads get
    // `shutdown_timeout_seconds` to finish before they are abandoned; an
    // abandoned download is never counted as delivered.
    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);
    let deadline = async move {
        if signalled_rx.await.is_ok() {
            info!(
                in_flight = gate.in_flight(),
                timeout_secs = shutdown_timeout.as_secs(),
                "waiting for in-flight downloads..."
            );
            tokio::time::sleep(shutdown_timeout).await;
            gate
        } else {
            std::future::pending().await
        }
    };

    tokio::select! {
        result = server => result?,
        gate = deadline => {
            warn!(
                in_flight = gate.in_flight(),
                "shutdown timeout exceeded, abandoning in-flight downloads"
            );
        }
    }

    telemetry_guard.shutdown();

    info!("strongbox-server shut down");
    Ok(())
}

/// Resolve the artifact root and wire the catalog, gate and coordinator.
///
/// With `rebuild`, a memory catalog is repopulated from the artifact root so
/// a restart does not lose every export.
async fn build_coordinator(
    config: &StrongboxConfig,
    rebuild: bool,
) -> Result<Arc<LifecycleCoordinator>, Box<dyn std::error::Error>> {
    let root = std::path::absolute(&config.artifacts.root)?;
    tokio::fs::create_dir_all(&root).await?;
    let root = ArtifactRoot::new(root);
    info!(root = %root.path().display(), "artifact root resolved");

    let catalog = create_catalog(&config.catalog, &root).await?;
    let gate = DownloadGate::new(config.artifacts.max_concurrent_downloads_per_owner);
    let coordinator = LifecycleCoordinator::new(catalog, root, gate);

    if rebuild && config.catalog.backend == CatalogBackend::Memory {
        let restored = coordinator.rescan(config.artifacts.default_format).await?;
        info!(artifacts = restored.len(), "memory catalog rebuilt from artifact root");
    }
    Ok(Arc::new(coordinator))
}

fn warn_if_ephemeral(config: &StrongboxConfig) {
    if config.catalog.backend == CatalogBackend::Memory {
        warn!(
            "catalog backend is memory; this command only validates, the server rebuilds its catalog from the artifact root at startup"
        );
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
