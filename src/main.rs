use clap::Parser;
use oncall_dispatch::{
    api::{build_router, AppState},
    config::Config,
    routing::EscalationEngine,
    state::create_store,
    telephony::create_gateway,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "oncall-dispatch", version, about = "Emergency-call dispatch service")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "CONFIG_PATH", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oncall_dispatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load_from(&cli.config)
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {}", e))?;

    tracing::info!("Starting oncall-dispatch v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage backend: {:?}", config.state.backend);

    let store = create_store(&config.state).await?;
    let gateway = create_gateway(&config.telephony)?;

    let engine = EscalationEngine::new(
        store.clone(),
        gateway,
        Duration::from_secs(config.dispatch.claim_window_secs),
    );
    tracing::info!(
        claim_window_secs = config.dispatch.claim_window_secs,
        "Escalation engine initialized"
    );

    let app_state = AppState::new(engine, store);
    let app = build_router(app_state);

    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Telephony callbacks: http://{}/v1/telephony", http_addr);
    tracing::info!("   REST API: http://{}/v1/incidents", http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
