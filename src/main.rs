use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wachposten::{config, middleware, routes, state::SecurityState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + tägliche Datei-Rotation unter ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "wachposten.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Guards am Leben halten, damit die Non-Blocking Writer korrekt flushen
    let _log_guards = (stdout_guard, file_guard);

    // Konfiguration (eingebettete Defaults -> wachposten.toml -> env/.env)
    let app_cfg = config::load()?;
    if app_cfg.security.admin_token.is_none() {
        info!("No admin token configured - /admin routes are disabled");
    }

    let state = SecurityState::new(app_cfg.clone());

    // Periodischer Sweep über Rate-Limit-Einträge und Blacklist
    let shutdown = CancellationToken::new();
    let cleanup = middleware::spawn_cleanup_task(
        state.guard.clone(),
        app_cfg.rate_limits.cleanup_interval(),
        shutdown.clone(),
    );

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // CORS: in Debug permissiv (lokale Entwicklung), in Release same-origin
    let app = if cfg!(debug_assertions) { app.layer(CorsLayer::permissive()) } else { app };

    let addr: SocketAddr = format!("{}:{}", app_cfg.server.host, app_cfg.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", app_cfg.server.host, app_cfg.server.port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(production = app_cfg.security.production, "Wachposten listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    cleanup.await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
