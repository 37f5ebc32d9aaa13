//! betbot-back binary entrypoint wiring REST, SSE, timers and snapshot persistence.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use betbot_back::{
    config::AppConfig,
    dao::snapshot_store::FileSnapshotStore,
    routes,
    services::{
        bootstrap, live_update_service, reaction_service, storage_supervisor, timer_service,
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = FileSnapshotStore::new(
        config.data_file.clone(),
        config.backup_dir.clone(),
        config.backup_keep,
    );
    let (app_state, channels) = AppState::new(config, Arc::new(store));

    bootstrap::restore(&app_state)
        .await
        .context("restoring betting state")?;

    let workers = [
        tokio::spawn(timer_service::run_dispatcher(
            app_state.clone(),
            channels.timer_signals,
        )),
        tokio::spawn(reaction_service::run_applier(
            app_state.clone(),
            channels.reaction_intents,
        )),
        tokio::spawn(live_update_service::run(app_state.clone())),
        tokio::spawn(storage_supervisor::run(app_state.clone())),
    ];

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    app_state.begin_shutdown();
    for worker in workers {
        if let Err(err) = worker.await {
            warn!(error = %err, "background worker ended abnormally");
        }
    }
    match app_state.flush().await {
        Ok(revision) => info!(revision, "final snapshot written"),
        Err(err) => warn!(error = %err, "final snapshot could not be written"),
    }

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
