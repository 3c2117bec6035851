use chrono::Duration;
use serde::Deserialize;
use std::{env, path::Path, path::PathBuf};
use thiserror::Error;

pub const DEFAULT_AIRTABLE_API_BASE: &str = "https://api.airtable.com/v0";
pub const DEFAULT_AIRTABLE_OAUTH_BASE: &str = "https://airtable.com/oauth2/v1";
pub const DEFAULT_AIRTABLE_SCOPES: &str = "data.records:read data.records:write schema.bases:read";
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24 * 7;
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    pub app: AppConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
    pub airtable: AirtableConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub service_name: String,
    pub port: u16,
    pub env: String,
    /// Where the browser is sent after login; also the allowed CORS origin.
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Required when `paths.database` points at a remote libsql server.
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub export_traces: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AirtableConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_oauth_base")]
    pub oauth_base: String,
}

impl AirtableConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.redirect_uri.trim().is_empty()
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.oauth_base.trim_end_matches('/'))
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.oauth_base.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    pub secret: String,
    #[serde(default = "default_session_ttl")]
    pub ttl_hours: i64,
    #[serde(default)]
    pub secure_cookies: bool,
}

impl SessionConfig {
    /// Session lifetime, or `None` when `ttl_hours` is outside `1..=MAX_SESSION_TTL_HOURS`.
    pub fn ttl(&self) -> Option<Duration> {
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.ttl_hours) {
            return None;
        }
        Duration::try_hours(self.ttl_hours)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WebhookConfig {
    /// When set, incoming Airtable webhooks must carry a matching signature.
    pub secret: Option<String>,
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_scopes() -> String {
    DEFAULT_AIRTABLE_SCOPES.to_string()
}

fn default_api_base() -> String {
    DEFAULT_AIRTABLE_API_BASE.to_string()
}

fn default_oauth_base() -> String {
    DEFAULT_AIRTABLE_OAUTH_BASE.to_string()
}

fn default_session_ttl() -> i64 {
    DEFAULT_SESSION_TTL_HOURS
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ConfigBuild(config::ConfigError),
    #[error("failed to parse configuration: {0}")]
    Deserialize(config::ConfigError),
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid APP_PORT override: {0}")]
    InvalidPort(std::num::ParseIntError),
    #[error("session secret must not be empty")]
    EmptySessionSecret,
    #[error("session.ttl_hours must be between 1 and {MAX_SESSION_TTL_HOURS}, got {0}")]
    InvalidSessionTtl(i64),
}

impl Config {
    /// Load configuration from the provided path, apply environment overrides, and
    /// resolve any `env:` indirections.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(ConfigError::ConfigBuild)?;

        let mut cfg: Config = raw.try_deserialize().map_err(ConfigError::Deserialize)?;
        cfg.apply_env_overrides()?;
        cfg.resolve_env_markers()?;
        cfg.expand_paths();

        if cfg.session.secret.trim().is_empty() {
            return Err(ConfigError::EmptySessionSecret);
        }
        if cfg.session.ttl().is_none() {
            return Err(ConfigError::InvalidSessionTtl(cfg.session.ttl_hours));
        }
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = env::var("APP_PORT") {
            let port: u16 = port.parse().map_err(ConfigError::InvalidPort)?;
            self.app.port = port;
        }

        if let Ok(otlp) = env::var("OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(otlp);
        }

        if let Ok(secret) = env::var("AIRTABLE_CLIENT_SECRET") {
            self.airtable.client_secret = Some(secret);
        }

        if let Ok(secret) = env::var("SESSION_SECRET") {
            self.session.secret = secret;
        }

        Ok(())
    }

    fn resolve_env_markers(&mut self) -> Result<(), ConfigError> {
        apply_env_marker(&mut self.app.service_name)?;
        apply_env_marker(&mut self.app.env)?;
        apply_env_marker(&mut self.app.frontend_url)?;
        apply_env_marker_path(&mut self.paths.database)?;
        apply_env_marker_opt(&mut self.database.auth_token)?;
        apply_env_marker_opt(&mut self.telemetry.otlp_endpoint)?;
        apply_env_marker(&mut self.airtable.client_id)?;
        apply_env_marker_opt(&mut self.airtable.client_secret)?;
        apply_env_marker(&mut self.airtable.redirect_uri)?;
        apply_env_marker(&mut self.session.secret)?;
        apply_env_marker_opt(&mut self.webhooks.secret)?;
        Ok(())
    }

    fn expand_paths(&mut self) {
        let database_string = self.paths.database.to_string_lossy().to_string();
        let database = shellexpand::tilde(&database_string);
        self.paths.database = PathBuf::from(database.as_ref());
    }
}

fn apply_env_marker(value: &mut String) -> Result<(), ConfigError> {
    if let Some(rest) = value.strip_prefix("env:") {
        let resolved = env::var(rest).map_err(|_| ConfigError::MissingEnvVar(rest.to_string()))?;
        *value = resolved;
    }
    Ok(())
}

fn apply_env_marker_opt(value: &mut Option<String>) -> Result<(), ConfigError> {
    if let Some(inner) = value {
        apply_env_marker(inner)?;
    }
    Ok(())
}

fn apply_env_marker_path(path: &mut PathBuf) -> Result<(), ConfigError> {
    let mut value = path.to_string_lossy().to_string();
    apply_env_marker(&mut value)?;
    *path = PathBuf::from(value);
    Ok(())
}
