use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::api::{self, AppState};
use super::db::{DbHandle, PortalDb};
use super::notifications::NotificationFeed;
use crate::config::CivicToml;

/// Configuration for the portal server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub session_ttl_hours: u32,
    pub recent_limit: usize,
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_toml(&CivicToml::default())
    }
}

impl ServerConfig {
    pub fn from_toml(config: &CivicToml) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            dev_mode: config.server.dev_mode,
            session_ttl_hours: config.auth.session_ttl_hours,
            recent_limit: config.notifications.recent_limit,
            channel_capacity: config.notifications.channel_capacity,
        }
    }
}

/// Build the full application router with request tracing.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open the database and assemble shared state.
pub fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }
    let db = PortalDb::new(&config.db_path).context("Failed to initialize portal database")?;
    Ok(Arc::new(AppState {
        db: DbHandle::new(db),
        feed: NotificationFeed::new(config.channel_capacity),
        session_ttl_hours: config.session_ttl_hours,
        recent_limit: config.recent_limit,
    }))
}

/// Start the portal server and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config)?;
    let app = build_router(state, config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        %local_addr,
        db = %config.db_path.display(),
        dev_mode = config.dev_mode,
        "CivicReport listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(dev_mode: bool) -> Router {
        let state = Arc::new(AppState {
            db: DbHandle::new(PortalDb::new_in_memory().unwrap()),
            feed: NotificationFeed::new(16),
            session_ttl_hours: 1,
            recent_limit: 20,
        });
        build_router(state, dev_mode)
    }

    #[tokio::test]
    async fn test_health_through_full_router() {
        let response = test_router(false)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_recent_issues_empty() {
        let response = test_router(false)
            .oneshot(Request::get("/api/issues/recent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn test_dev_mode_adds_cors_headers() {
        let request = Request::get("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let response = test_router(true).oneshot(request).await.unwrap();
        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }

    #[test]
    fn test_build_state_creates_db_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            db_path: dir.path().join("nested/civic.db"),
            ..ServerConfig::default()
        };
        build_state(&config).unwrap();
        assert!(config.db_path.exists());
    }

    #[test]
    fn test_default_config_matches_toml_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3140);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.recent_limit, 20);
    }
}
