use std::{env, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    routing::get,
};
use formbridge_core::{Config, Database, SessionSigner, init_telemetry, migrations};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod api;
#[cfg(test)]
mod test_support;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub sessions: SessionSigner,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        let sessions = SessionSigner::new(&config.session);
        Self {
            db,
            config: Arc::new(config),
            http: reqwest::Client::new(),
            sessions,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let db = Database::open(&config.paths.database, config.database.auth_token.as_deref()).await?;
    migrations::run_migrations(&db).await?;

    if !config.airtable.is_configured() {
        warn!("airtable oauth is not configured; login will be unavailable");
    }

    let port = config.app.port;
    let cors = cors_layer(&config.app.frontend_url)?;
    let state = AppState::new(db, config);
    let app = router(state).layer(cors);

    let shutdown = CancellationToken::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("formbridge listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(api::router())
        .with_state(state)
}

/// Only the configured frontend may call the API with credentials.
fn cors_layer(frontend_url: &str) -> Result<CorsLayer, header::InvalidHeaderValue> {
    let origin = HeaderValue::from_str(frontend_url.trim_end_matches('/'))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: String,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let healthy = state.db.health_check().await.is_ok();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: if healthy { "ok" } else { "unhealthy" }.to_string(),
        }),
    )
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_reports_ok_when_database_is_reachable() {
        let (state, _dir) = test_state("http://127.0.0.1:9").await;
        let (status, Json(body)) = healthz(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "healthy");
        assert_eq!(body.database, "ok");
    }

    #[tokio::test]
    async fn cors_allows_only_the_frontend_origin() {
        let (state, _dir) = test_state("http://127.0.0.1:9").await;
        let app = router(state).layer(cors_layer("http://localhost:5173/").expect("cors"));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("http://localhost:5173")
        );
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .and_then(|v| v.to_str().ok()),
            Some("true")
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header(header::ORIGIN, "https://evil.example")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let health: HealthResponse = serde_json::from_slice(&body).expect("json");
        assert_eq!(health.status, "healthy");
    }
}
