use anyhow::{Context, Result};
use std::sync::Arc;
use sts::cli::{self, Args, Commands};
use sts::{
    CommandRunner, ConfigDiscovery, ContainerStore, HostExecutor, InMemoryStore, ProgressHub,
    ServerCatalog, ServerOrchestrator, ServiceConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sts=info")),
        )
        .init();

    let args = Args::parse();
    let mut config =
        ConfigDiscovery::load(args.config.as_deref()).context("failed to load configuration")?;

    match args.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
        Commands::Servers => {
            let catalog = ServerCatalog::builtin();
            println!("{}", serde_json::to_string_pretty(catalog.list_all())?);
            Ok(())
        }
        Commands::StopAll => {
            let orchestrator = orchestrator(&config).await?;
            let removed = orchestrator.stop_all().await?;
            println!("Removed {} managed containers", removed);
            Ok(())
        }
        Commands::ShowConfig => {
            cli::show_discovery_info(&config);
            Ok(())
        }
    }
}

async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn ContainerStore>> {
    Ok(match &config.records_path {
        Some(path) => Arc::new(
            InMemoryStore::with_snapshot(path.clone())
                .await
                .with_context(|| format!("failed to load records from {}", path.display()))?,
        ),
        None => Arc::new(InMemoryStore::new()),
    })
}

async fn orchestrator(config: &ServiceConfig) -> Result<ServerOrchestrator> {
    let runner: Arc<dyn CommandRunner> = Arc::new(HostExecutor::new());
    Ok(ServerOrchestrator::from_config(
        config,
        ServerCatalog::builtin(),
        runner,
        open_store(config).await?,
        Arc::new(ProgressHub::new()),
    ))
}

#[cfg(feature = "http")]
async fn serve(config: ServiceConfig) -> Result<()> {
    use sts::api::{self, AppState};
    use sts::mail::MailClient;
    use sts::EngineCli;
    use tokio_util::sync::CancellationToken;

    let engine_path = which::which(&config.engine_program).with_context(|| {
        format!(
            "container engine `{}` not found on PATH",
            config.engine_program
        )
    })?;
    info!("Using container engine at {}", engine_path.display());

    let orchestrator = orchestrator(&config).await?;
    let engine = EngineCli::new(Arc::new(HostExecutor::new()), config.engine_program.clone());
    let mail = MailClient::new("localhost")?;
    let shutdown = CancellationToken::new();
    let reaper = orchestrator
        .hub()
        .spawn_reaper(config.reap_interval(), shutdown.clone());

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!("Listening on http://{}", address);

    let state = AppState::new(config, orchestrator.clone(), engine, mail, shutdown.clone());
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    let _ = reaper.await;

    info!("Removing managed containers...");
    match orchestrator.stop_all().await {
        Ok(removed) => info!("Removed {} managed containers", removed),
        Err(e) => warn!("Cleanup on shutdown failed: {}", e),
    }
    Ok(())
}

#[cfg(not(feature = "http"))]
async fn serve(_config: ServiceConfig) -> Result<()> {
    anyhow::bail!("this build of sts has no HTTP support; rebuild with the `http` feature")
}

/// Resolve on Ctrl-C or SIGTERM and cancel every open stream.
#[cfg(feature = "http")]
async fn shutdown_signal(shutdown: tokio_util::sync::CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }
    info!("Shutting down...");
    shutdown.cancel();
}
