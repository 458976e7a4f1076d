//! Voice session orchestrator entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use va_config::{load_settings, Settings};
use va_core::{NullStt, NullTts};
use va_server::{create_router, Orchestrator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = std::env::var("VOICE_AGENT_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing isn't initialized yet, so this goes straight to stderr.
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&config);

    tracing::info!("Starting voice session orchestrator v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        config_env = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    init_metrics();
    tracing::info!("Initialized Prometheus metrics at /metrics");

    // Real STT/TTS adapters are an external collaborator out of scope here;
    // the null doubles keep the orchestrator fully runnable on its own.
    let orchestrator = Orchestrator::new(
        Arc::new(RwLock::new(config.clone())),
        Arc::new(NullStt),
        Arc::new(NullTts),
        Arc::new(NullTts),
    );

    let app = create_router(Arc::clone(&orchestrator));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_deadline_ms = config.server.shutdown_deadline_ms;
    let shutdown_orchestrator = orchestrator.clone();
    let clean_shutdown = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let clean_shutdown_writer = Arc::clone(&clean_shutdown);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let ok = shutdown_orchestrator
                .shutdown(std::time::Duration::from_millis(shutdown_deadline_ms))
                .await;
            clean_shutdown_writer.store(ok, std::sync::atomic::Ordering::SeqCst);
        })
        .await?;

    if !clean_shutdown.load(std::sync::atomic::Ordering::SeqCst) {
        tracing::error!("shutdown deadline exceeded; exiting non-zero");
        std::process::exit(1);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => tracing::info!("received SIGTERM, initiating graceful shutdown..."),
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("va_server={level},va_pipeline={level},va_core={level},tower_http=debug").into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

fn init_metrics() {
    if va_server::http::prometheus_handle().is_none() {
        tracing::warn!("Prometheus recorder unavailable; /metrics will return 503");
    }
}
