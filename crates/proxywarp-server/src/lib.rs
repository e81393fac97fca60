pub mod dispatch;
pub mod pages;
pub mod proxy;
pub mod rewrite;
pub mod routes;
pub mod script;
pub mod state;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use proxywarp_core::config::Settings;

use crate::state::AppState;

/// Initialize tracing/logging for the server. Call once before `serve()`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxywarp=info,proxywarp_server=info,tower_http=info".into()),
        )
        .init();
}

/// Build the axum router: management surface plus the host-based
/// reverse-proxy dispatch wrapped around it.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut management = Router::new()
        .merge(routes::home::router())
        .merge(routes::convert::router())
        .merge(routes::token::router())
        .merge(routes::health::router());

    if state.settings.server.debug {
        management = management.merge(routes::admin::router());
    }

    let debug = state.settings.server.debug;
    management
        .fallback(move || async move { not_found(debug) })
        .layer(CorsLayer::permissive())
        // outermost of the two, so proxied subdomains never reach the
        // management routes or their CORS layer
        .layer(middleware::from_fn_with_state(state.clone(), dispatch::host_dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn not_found(debug: bool) -> Response {
    pages::error_response(
        debug,
        StatusCode::NOT_FOUND,
        "Not Found",
        "No such page on this gateway.",
        None,
    )
}

/// Resolve when the process is asked to stop (SIGINT or SIGTERM).
async fn wait_for_termination() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => info!("Ctrl+C received, draining the gateway"),
                _ = sigterm.recv() => info!("SIGTERM received, draining the gateway"),
            },
            Err(e) => {
                error!("cannot watch SIGTERM: {e}");
                ctrl_c.await.ok();
                info!("Ctrl+C received, draining the gateway");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Ctrl+C received, draining the gateway");
    }
}

/// Run the gateway. Binds the listener (bind failure is fatal), starts
/// directory maintenance, and serves until `shutdown` is cancelled —
/// by the caller, or by SIGINT/SIGTERM. In-flight proxy requests drain
/// and the token directory is flushed before returning.
pub async fn serve(settings: Settings, shutdown: CancellationToken) -> color_eyre::Result<()> {
    let state = Arc::new(AppState::new(settings.clone())?);
    state.directory.spawn_maintenance(shutdown.clone());

    // termination signals trip the same token the maintenance tickers
    // and the graceful-shutdown path watch
    let signals = shutdown.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        signals.cancel();
    });

    let addr = settings.server.bind_addr();
    let router = build_router(state.clone());

    let listener = TcpListener::bind(&addr).await?;
    info!(
        %addr,
        base_domain = %settings.server.base_domain,
        debug = settings.server.debug,
        "ProxyWarp listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    state.directory.flush();
    info!("Token directory flushed, gateway stopped");

    Ok(())
}
