//! Lifecycle & Shutdown (component H).
//!
//! Startup order: warm cache -> install signal handlers -> open listener.
//! Shutdown: stop accepting connections, stop the janitor, push a close
//! frame to every open socket, exit.

use std::sync::Arc;

use axum::extract::ws::Message;
use axum::routing::get;
use axum::Router;
use challenge_server::cache::Cache;
use challenge_server::config::Config;
use challenge_server::session::{ws_handler, Engine};
use challenge_server::store::Store;
use challenge_server::janitor;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        error!(%err, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load();

    let store = Store::connect(&config.database_url).await?;
    let cache = Cache::new();

    // Warm cache before anything else is reachable: a stale cache is worse
    // than no service (spec §4.7).
    janitor::warm_nominations(&store, &cache).await?;

    let engine = Arc::new(Engine::new(store, cache));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor_handle = tokio::spawn({
        let engine = engine.clone();
        async move { janitor::run(&engine.cache, shutdown_rx).await }
    });

    // Push a close frame to every open socket the instant the shutdown
    // signal fires, concurrently with axum's graceful drain below — a
    // long-lived websocket task never closes on its own, so waiting for
    // `serve` to return first would mean it never returns (spec §4.8).
    let closer_handle = tokio::spawn({
        let engine = engine.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        async move {
            let _ = shutdown_rx.changed().await;
            for (user_id, _) in engine.cache.all_online().await {
                if let Some(entry) = engine.cache.find_by_user(&user_id).await {
                    let _ = entry.tx.send(Message::Close(Some(axum::extract::ws::CloseFrame {
                        code: 1000,
                        reason: "Server shutting down".into(),
                    })));
                }
            }
        }
    });

    let app = Router::new().route("/ws", get(ws_handler)).fallback(get(ws_handler)).with_state(engine.clone());

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = janitor_handle.await;
    let _ = closer_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining connections");
}
