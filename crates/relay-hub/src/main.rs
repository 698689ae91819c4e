//! Event Hub Server
//!
//! A real-time event/session management backend built with Axum and
//! WebSockets, fronting the Hub's per-event actors over REST and WS.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    http::{Method, header},
    routing::get,
};
use relay_core::clock::system_clock;
use relay_core::config::Config;
use relay_core::errors::Report;
use relay_core::log;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use relay_hub::hub::spawn_idle_sweep;
use relay_hub::repository::InMemoryRepository;
use relay_hub::{handlers, AppState};

#[tokio::main]
async fn main() -> Result<(), Report> {
    log::setup()?;

    let config = Config::from_env();
    let repository = Arc::new(InMemoryRepository::new());
    let app_state = AppState::new(repository, system_clock(), config);

    let shutdown = CancellationToken::new();
    let idle_sweep = spawn_idle_sweep(app_state.hub.clone(), shutdown.clone());

    let app = setup_routes(app_state);

    let listener = TcpListener::bind("127.0.0.1:3030").await?;
    log::info!("starting server on http://{}", listener.local_addr()?);
    log::info!("press Ctrl+C to stop the server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    idle_sweep.abort();

    log::info!("shutting down server");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::SignalKind;

        signal::unix::signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("signal received, starting graceful shutdown");
}

/// Setup the application routes
fn setup_routes(app_state: Arc<AppState>) -> Router {
    let ws_routes = Router::new()
        .route("/ws", get(handlers::ws::upgrade))
        .with_state(app_state.clone());

    Router::new()
        .route("/health", get(handlers::health::get))
        .merge(ws_routes)
        .layer(cors_layer())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Setup CORS layer.
///
/// In debug builds this allows requests from common local dev ports; in
/// release builds it falls back to permissive CORS since the event hub
/// is expected to sit behind a reverse proxy that narrows this down.
fn cors_layer() -> CorsLayer {
    if cfg!(debug_assertions) {
        let dev_ports = [3000, 8000, 8080, 8081, 5173];
        let mut origins = Vec::new();

        for port in dev_ports {
            origins.push(format!("http://localhost:{port}").parse().unwrap());
            origins.push(format!("http://127.0.0.1:{port}").parse().unwrap());
        }

        CorsLayer::new()
            .allow_origin(origins)
            .allow_headers([header::CONTENT_TYPE])
            .allow_methods([Method::GET, Method::POST])
    } else {
        CorsLayer::permissive()
    }
}
