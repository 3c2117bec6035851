use std::path::PathBuf;

use axum::body::to_bytes;
use axum::response::Response;
use chrono::{Duration, Utc};
use formbridge_core::config::{
    AirtableConfig, AppConfig, DEFAULT_AIRTABLE_SCOPES, DatabaseConfig, PathsConfig,
    SessionConfig, TelemetryConfig, WebhookConfig,
};
use formbridge_core::{Config, Database, OAuthTokens, User, UserRepository, migrations};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::AppState;

pub fn test_config(airtable_base: &str, database: PathBuf) -> Config {
    Config {
        app: AppConfig {
            service_name: "formbridge-test".into(),
            port: 0,
            env: "test".into(),
            frontend_url: "http://localhost:5173".into(),
        },
        paths: PathsConfig { database },
        database: DatabaseConfig::default(),
        telemetry: TelemetryConfig {
            otlp_endpoint: None,
            export_traces: false,
        },
        airtable: AirtableConfig {
            client_id: "client-1".into(),
            client_secret: Some("client-secret".into()),
            redirect_uri: "http://localhost:3000/auth/airtable/callback".into(),
            scopes: DEFAULT_AIRTABLE_SCOPES.into(),
            api_base: format!("{airtable_base}/v0"),
            oauth_base: format!("{airtable_base}/oauth2/v1"),
        },
        session: SessionConfig {
            secret: "test-session-secret".into(),
            ttl_hours: 1,
            secure_cookies: false,
        },
        webhooks: WebhookConfig::default(),
    }
}

/// App state over a migrated temp database, talking to Airtable at `airtable_base`.
pub async fn test_state(airtable_base: &str) -> (AppState, TempDir) {
    test_state_with(airtable_base, |_| {}).await
}

pub async fn test_state_with(
    airtable_base: &str,
    customize: impl FnOnce(&mut Config),
) -> (AppState, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("test.sqlite");
    let db = Database::new(&db_path).await.expect("create db");
    migrations::run_migrations(&db).await.expect("migrations");

    let mut config = test_config(airtable_base, db_path);
    customize(&mut config);
    (AppState::new(db, config), dir)
}

pub async fn seed_user(state: &AppState, airtable_user_id: &str) -> User {
    UserRepository::new(state.db.clone())
        .upsert_login(
            airtable_user_id,
            Some("owner@example.com"),
            &json!({ "id": airtable_user_id }),
            &OAuthTokens {
                access_token: "access-token".into(),
                refresh_token: "refresh-token".into(),
                expires_at: Utc::now() + Duration::hours(1),
            },
        )
        .await
        .expect("seed user")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}
