use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crawlguard::clock::{Clock, SystemClock, ThreadRandom};
use crawlguard::config::settings::{LoggingConfig, Settings};
use crawlguard::prevention::{default_protector, DecoyPageGenerator, HoneypotGenerator, PreventionEngine};
use crawlguard::protection::client_report::ClientReportScorer;
use crawlguard::protection::pipeline::DetectionPipeline;
use crawlguard::proxy::http_handler::HttpHandler;
use crawlguard::proxy::server::ProxyServer;
use crawlguard::storage::{CacheStore, MemoryStore};

const DEFAULT_CONFIG_PATH: &str = "/etc/crawlguard/crawlguard.toml";

/// Parse the `--config` CLI flag. Defaults to `/etc/crawlguard/crawlguard.toml`.
fn parse_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from(DEFAULT_CONFIG_PATH);

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                config_path = path.clone();
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    config_path
}

/// Initialise the `tracing` subscriber with stdout and non-blocking file
/// output. The returned guard must live until shutdown so buffered lines
/// are flushed.
fn init_tracing(logging: &LoggingConfig) -> Result<WorkerGuard> {
    let log_path = Path::new(&logging.file);
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("crawlguard.log");
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::with_capacity(2);
    if logging.json {
        layers.push(fmt::layer().json().with_writer(std::io::stdout).boxed());
        layers.push(fmt::layer().json().with_writer(file_writer).with_ansi(false).boxed());
    } else {
        layers.push(fmt::layer().with_writer(std::io::stdout).with_target(true).boxed());
        layers.push(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        );
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    tracing_subscriber::registry().with(layers).with(filter).init();

    Ok(guard)
}

/// Background task that periodically evicts expired entries from the store.
async fn cleanup_loop(store: Arc<MemoryStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let before = store.len();
        store.cleanup();
        tracing::debug!(before = before, after = store.len(), "Store cleanup");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let config_path = parse_config_path();
    let settings = Arc::new(Settings::load(&config_path)?);

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    let _log_guard = init_tracing(&settings.logging)?;

    info!("Starting crawlguard");
    info!("Config loaded from {}", config_path);

    // ---------------------------------------------------------------
    // 3. Storage
    // ---------------------------------------------------------------
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let memory = Arc::new(MemoryStore::new(clock.clone()));
    let store: Arc<dyn CacheStore> = memory.clone();

    tokio::spawn(cleanup_loop(
        memory.clone(),
        Duration::from_secs(settings.storage.cleanup_interval_secs.max(1)),
    ));

    // ---------------------------------------------------------------
    // 4. Detection and prevention
    // ---------------------------------------------------------------
    let pipeline = Arc::new(DetectionPipeline::from_settings(&settings, store));

    let honeypot: Arc<dyn HoneypotGenerator> = Arc::new(DecoyPageGenerator::new(Arc::new(ThreadRandom)));
    let engine = Arc::new(PreventionEngine::new(
        &settings.prevention,
        Arc::new(default_protector()),
        Some(honeypot),
    ));
    let reports = Arc::new(ClientReportScorer::new(&settings.client_report));

    info!(
        mode = ?engine.mode(),
        min_delay_ms = engine.min_delay().as_millis() as u64,
        "Prevention engine initialised"
    );

    // ---------------------------------------------------------------
    // 5. Proxy
    // ---------------------------------------------------------------
    let handler = Arc::new(HttpHandler::new(pipeline, engine, reports, clock, settings.clone()));
    let server = ProxyServer::new(settings.clone(), handler);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Proxy server stopped: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}
