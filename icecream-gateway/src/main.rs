//! ICeCream gateway - Main entry point
//!
//! Loads configuration, wires the providers and serves the HTTP API until
//! Ctrl+C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use icecream_common::config::load_toml_config;
use icecream_common::GatewayConfig;
use icecream_gateway::providers::{ChatCompletionsClient, ManimClient, MineruRecognizer, VisionRecognizer};
use icecream_gateway::recognition::TieredRecognizer;
use icecream_gateway::types::RecognitionProvider;
use icecream_gateway::{build_router, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for icecream-gateway
#[derive(Parser, Debug)]
#[command(name = "icecream-gateway")]
#[command(about = "Recognition, seating and intent routing gateway for ICeCream")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "ICECREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides PORT and the config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let default_filter = format!("icecream_gateway={},tower_http=info", toml_config.logging.level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = GatewayConfig::from_env_and_toml(&toml_config);
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("Starting ICeCream gateway v{}", env!("CARGO_PKG_VERSION"));
    for warning in config.configuration_warnings() {
        warn!("{}", warning);
    }
    info!(
        enabled = config.intent.enabled,
        threshold = config.intent.confidence_threshold,
        "Intent classifier"
    );

    let call_timeout = config.timeouts.provider_call;
    let generation_timeout = config.timeouts.generation;

    let reasoning = ChatCompletionsClient::new("deepseek", &config.reasoning, generation_timeout)
        .context("Failed to build reasoning client")?;
    info!(model = %reasoning.model(), "Reasoning provider");

    let mut tiers: Vec<Arc<dyn RecognitionProvider>> = Vec::new();
    if config.mineru.enabled {
        match MineruRecognizer::from_config(&config.mineru, config.cloud_job.clone(), call_timeout) {
            Ok(mineru) => tiers.push(Arc::new(mineru)),
            Err(e) => error!(error = %e, "MinerU tier disabled"),
        }
    }
    let vision_client = ChatCompletionsClient::new("siliconflow", &config.vision, call_timeout)
        .context("Failed to build vision client")?;
    info!(model = %vision_client.model(), "Vision recognition tier");
    tiers.push(Arc::new(VisionRecognizer::new(vision_client)));

    let recognizer = TieredRecognizer::new(tiers, call_timeout);
    info!(tiers = ?recognizer.tier_names(), "Recognition tiers");

    let renderer = ManimClient::new(config.manim_service_url.clone(), generation_timeout)
        .context("Failed to build render client")?;
    info!(url = %config.manim_service_url, "Render service");

    let addr = format!("{}:{}", config.bind_address, config.port);
    let state = AppState::new(config, Arc::new(reasoning), recognizer, Arc::new(renderer))
        .context("Failed to initialise services")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
