mod bootstrap;
mod health;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use vigil_common::config::GatewayConfig;
use vigil_gateway::{BackendRegistry, FetchClient, MetricsInfoTable, QueryOrchestrator, SimpleForwarder};

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Vigil: monitoring-data fan-out gateway")]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "vigil.toml")]
    config: String,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen_addr: Option<String>,

    /// Metrics listen address (overrides config).
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Register backends without the TCP probe.
    #[arg(long)]
    no_probe: bool,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --print-default-config: dump default TOML and exit
    if cli.print_default_config {
        let toml_str = GatewayConfig::default()
            .to_toml_string()
            .unwrap_or_else(|e| format!("# failed to serialize default config: {}", e));
        println!("{}", toml_str);
        return Ok(());
    }

    vigil_observability::init_tracing();
    tracing::info!("Starting vigil gateway...");

    let mut config = load_config(&cli.config);

    // CLI overrides
    if let Some(ref addr) = cli.listen_addr {
        config.server.listen_addr = addr.clone();
    }
    if let Some(ref addr) = cli.metrics_addr {
        config.server.metrics_addr = addr.clone();
    }
    if cli.no_probe {
        config.server.probe_backends = false;
    }

    tracing::info!("Config: {:?}", config);

    if let Err(e) = vigil_observability::init_metrics(&config.server.metrics_addr) {
        tracing::warn!("Failed to initialize metrics: {}", e);
    }

    let registry = BackendRegistry::new();
    bootstrap::bootstrap(&config, &registry).await?;

    let client = FetchClient::new()?;
    let health_state = Arc::new(health::HealthState::new(registry.clone()));
    let state = routes::AppState {
        orchestrator: Arc::new(QueryOrchestrator::new(registry.clone(), client.clone())),
        forwarder: Arc::new(SimpleForwarder::new(registry.clone(), client)),
        metrics_table: Arc::new(MetricsInfoTable::new(config.metrics.clone())),
        health: health_state.clone(),
        registry,
        timeouts: config.timeouts.clone(),
        probe_timeout: config
            .server
            .probe_backends
            .then(|| Duration::from_millis(config.server.probe_timeout_ms)),
    };
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!("vigil ready on http://{}", listener.local_addr()?);

    // Mark not-ready before the drain so probes return 503 while in-flight
    // queries finish.
    let health_state_for_shutdown = health_state.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let shutdown_reason = wait_for_shutdown_signal().await;
            tracing::info!("{}, initiating graceful shutdown", shutdown_reason);
            health_state_for_shutdown.set_ready(false);
        })
        .await?;

    tracing::info!("vigil stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, returning a description of which signal fired.
async fn wait_for_shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT (Ctrl+C) received",
                _ = sigterm.recv() => "SIGTERM received",
            },
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT (Ctrl+C) received"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT (Ctrl+C) received"
    }
}

fn load_config(path: &str) -> GatewayConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match GatewayConfig::from_toml_str(&content) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}, using defaults", path, e);
                GatewayConfig::default()
            }
        },
        Err(_) => {
            tracing::info!("Config file {} not found, using defaults", path);
            GatewayConfig::default()
        }
    }
}
