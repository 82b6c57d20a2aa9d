//! Audio session engine (weir-engine) - Main entry point
//!
//! Wires the stream locator, ffmpeg pipeline factory, session manager, and
//! multiplexed transport together under the HTTP control surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weir_common::EventBus;
use weir_engine::api;
use weir_engine::config::Config;
use weir_engine::locator::StreamLocator;
use weir_engine::pipeline::FfmpegPipelineFactory;
use weir_engine::session::SessionManager;
use weir_engine::transport::TransportServer;

/// Command-line arguments for weir-engine
#[derive(Parser, Debug)]
#[command(name = "weir-engine")]
#[command(about = "Audio session engine for weir")]
#[command(version)]
struct Args {
    /// Port for the HTTP control surface
    #[arg(short, long, env = "WEIR_PORT")]
    port: Option<u16>,

    /// Bind address for the multiplexed audio/event transport
    #[arg(short, long, env = "WEIR_TRANSPORT_ADDR")]
    transport_addr: Option<SocketAddr>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "WEIR_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the ffmpeg binary
    #[arg(long, env = "WEIR_FFMPEG")]
    ffmpeg: Option<String>,

    /// Path to the yt-dlp binary
    #[arg(long, env = "WEIR_YTDLP")]
    ytdlp: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weir_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Config file (or defaults), then CLI/env overrides on top
    let mut config = Config::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(addr) = args.transport_addr {
        config.transport_addr = addr;
    }
    if let Some(ffmpeg) = args.ffmpeg {
        config.ffmpeg_path = ffmpeg;
    }
    if let Some(ytdlp) = args.ytdlp {
        config.ytdlp_path = ytdlp;
    }

    info!("Starting weir audio session engine");

    // Event bus shared by the session manager and the transport
    let events = Arc::new(EventBus::new(256));

    // Multiplexed transport for audio frames + status events
    let transport = TransportServer::new();
    let transport_listener = tokio::net::TcpListener::bind(config.transport_addr)
        .await
        .with_context(|| format!("Failed to bind transport to {}", config.transport_addr))?;
    Arc::clone(&transport).run(transport_listener, &events);

    // Session manager with the production locator and pipeline factory
    let locator = StreamLocator::new(&config);
    let factory = Arc::new(FfmpegPipelineFactory::new(
        config.ffmpeg_path.clone(),
        config.chunk_size,
        config.channel_capacity,
    ));
    let manager = Arc::new(SessionManager::new(
        locator,
        factory,
        transport.clone(),
        Arc::clone(&events),
        config.clone(),
    ));

    // HTTP control surface
    let app = api::create_router(api::AppContext { manager });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

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
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
