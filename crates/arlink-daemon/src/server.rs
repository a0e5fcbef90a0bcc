//! HTTP routing and listeners

use anyhow::{bail, Context, Result};
use axum::routing::{delete, get, post, put};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

use crate::api;
use crate::config::{DaemonConfig, TlsConfig};
use crate::state::AppState;
use crate::ws;

/// Build the router for the session API
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Session lifecycle
        .route("/api/session/init", post(api::init_session))
        .route("/api/session/suspend", post(api::suspend_session))
        .route("/api/session/resume", post(api::resume_session))
        // Scene requests
        .route("/api/nodes", post(api::add_node))
        .route("/api/nodes/{name}", delete(api::remove_node))
        .route("/api/nodes/{name}/transform", put(api::update_node_transform))
        .route("/api/anchors", post(api::add_plane_anchor))
        .route("/api/anchors/{name}", delete(api::remove_anchor))
        .route("/api/anchors/{name}/nodes", post(api::add_node_to_anchor))
        .route("/api/entities/{name}", get(api::get_entity))
        .route("/api/touch", post(api::touch))
        .route("/api/scene", get(api::get_scene))
        .route("/api/status", get(api::get_status))
        .route("/api/config", get(api::get_config))
        // Event push channel
        .route("/ws", get(ws::websocket_handler))
        // Bundled assets
        .nest_service("/assets", ServeDir::new(&state.config.assets.root))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the router on the configured address, over TLS when a
/// certificate pair is configured
pub async fn serve(state: Arc<AppState>, daemon: &DaemonConfig) -> Result<()> {
    let app = router(state);
    match &daemon.tls {
        Some(tls) => serve_tls(app, &daemon.bind, tls).await,
        None => {
            let listener = tokio::net::TcpListener::bind(&daemon.bind)
                .await
                .with_context(|| format!("Failed to bind {}", daemon.bind))?;
            info!(address = %daemon.bind, protocol = "HTTP", "Listening");
            axum::serve(listener, app).await?;
            Ok(())
        }
    }
}

async fn serve_tls(app: Router, bind: &str, tls: &TlsConfig) -> Result<()> {
    for (what, path) in [("certificate", &tls.cert), ("key", &tls.key)] {
        if !Path::new(path).exists() {
            bail!("TLS {} file not found: {}", what, path);
        }
    }
    let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .context("Failed to load TLS certificate pair")?;
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", bind))?;

    info!(address = %addr, protocol = "HTTPS", cert = %tls.cert, "Listening");
    axum_server::bind_rustls(addr, rustls)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
