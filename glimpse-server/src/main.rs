// Glimpse detection relay
// Runs the detector over uploaded frames and forwards stable captures to the storage backend

use anyhow::Context;
use clap::Parser;
use glimpse_core::{CaptureEngine, CapturePolicy, GlimpseConfig};
use glimpse_eye::{DetectionPipeline, Detector};
use glimpse_server::{create_router, ApiState, CaptureDispatcher, HttpCaptureSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "glimpse-server")]
#[command(about = "Object detection relay with debounced capture forwarding", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (JSON or TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listening port
    #[arg(long)]
    port: Option<u16>,

    /// Listening address
    #[arg(long)]
    host: Option<String>,

    /// Base URL of the capture storage backend
    #[arg(long)]
    backend_url: Option<String>,

    /// Path to the ONNX model
    #[arg(long)]
    model: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }

    info!("Starting glimpse-server {}", env!("CARGO_PKG_VERSION"));

    let detector = build_detector(&config)?;
    let pipeline = DetectionPipeline::new(detector);
    info!("Detector ready: {}", pipeline.detector_name());

    let sink = HttpCaptureSink::from_config(&config.backend)
        .context("Failed to build backend client")?;
    info!("Captures will be forwarded to {}", sink.endpoint());

    let policy = CapturePolicy::new(config.capture.capturable_classes.iter().cloned());
    info!(
        "Capturing classes: {} (confidence >= {}, streak {}, margin {}px)",
        policy.capturable_classes().collect::<Vec<_>>().join(", "),
        policy.min_confidence(),
        policy.streak_threshold(),
        policy.margin()
    );

    let state = ApiState {
        pipeline,
        engine: CaptureEngine::new(policy),
        dispatcher: Arc::new(CaptureDispatcher::new(Arc::new(sink))),
        max_upload_bytes: config.server.max_upload_bytes,
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

/// File (or defaults), then environment, then command line
fn load_config(cli: &Cli) -> anyhow::Result<GlimpseConfig> {
    let mut config = match &cli.config {
        Some(path) => GlimpseConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GlimpseConfig::default(),
    };
    config.apply_env();

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(url) = &cli.backend_url {
        config.backend.base_url = url.clone();
    }
    if let Some(model) = &cli.model {
        config.detector.model_path = model.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(feature = "onnx")]
fn build_detector(config: &GlimpseConfig) -> anyhow::Result<Arc<dyn Detector>> {
    let detector = glimpse_eye::YoloDetector::new(&config.detector)
        .with_context(|| format!("Failed to load model {}", config.detector.model_path.display()))?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn build_detector(_config: &GlimpseConfig) -> anyhow::Result<Arc<dyn Detector>> {
    anyhow::bail!("No detector backend compiled in; rebuild with `--features onnx`")
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
