use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kapcha::api::{create_router, AppState};
use kapcha::classifier::{Classifier, ClassifierProvider};
use kapcha::config::Config;
use kapcha::engine::RecognitionEngine;

#[derive(Parser)]
#[command(name = "kapcha")]
#[command(about = "Self-hostable CAPTCHA recognition service")]
struct Args {
    /// Bind address, overrides KAPCHA_HOST
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides KAPCHA_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kapcha=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!("Initializing classifier: {}...", config.classifier.model);
    let classifier = Arc::new(ClassifierProvider::new(&config.classifier));
    if !classifier.is_available() {
        tracing::warn!(
            "Classifier unavailable - recognition requests will fail until the backend is fixed"
        );
    }

    let engine = RecognitionEngine::new(&config, classifier as Arc<dyn Classifier>);
    let state = AppState::new(config.clone(), engine)?;

    let cancel_token = CancellationToken::new();

    if config.cache.enabled {
        tracing::info!(
            "Starting cache sweeper... (interval={}s, ttl={}s)",
            config.cache.sweep_interval_secs,
            config.cache.ttl_secs
        );
        let engine = state.engine.clone();
        let interval = config.cache.sweep_interval_secs;
        let token = cancel_token.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Cache sweeper shutting down...");
                        break;
                    }
                    _ = tokio::time::sleep(tokio::time::Duration::from_secs(interval)) => {
                        let removed = engine.sweep_cache();
                        if removed > 0 {
                            tracing::debug!("Cache sweep removed {} expired entries", removed);
                        }
                    }
                }
            }
        });
    }

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Kapcha starting on http://{}", addr);
    tracing::info!("  Health check: http://{}/api/v1/health", addr);
    tracing::info!("  Stats:        http://{}/api/v1/stats", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling background tasks...");
    cancel_token.cancel();
}
