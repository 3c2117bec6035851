use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use thiserror::Error;

use crate::config::AirtableConfig;

pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl OAuthTokens {
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now + buffer >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("missing refresh token")]
    MissingRefreshToken,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token response decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("invalid expires_in value: {0}")]
    InvalidExpires(i64),
}

impl OAuthError {
    /// The OAuth error code (`invalid_grant`, `invalid_client`, ...) from a
    /// rejected token request, when Airtable supplied one.
    pub fn error_code(&self) -> Option<String> {
        match self {
            OAuthError::TokenEndpoint { body, .. } => serde_json::from_str::<TokenErrorBody>(body)
                .ok()
                .map(|parsed| parsed.error),
            _ => None,
        }
    }

    pub fn error_description(&self) -> Option<String> {
        match self {
            OAuthError::TokenEndpoint { body, .. } => serde_json::from_str::<TokenErrorBody>(body)
                .ok()
                .and_then(|parsed| parsed.error_description),
            _ => None,
        }
    }

    /// Errors caused by the client registration rather than the user.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.error_code().as_deref(),
            Some("invalid_client") | Some("invalid_grant")
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Persists tokens after a refresh so the next request starts from them.
#[async_trait]
pub trait TokenStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn save_tokens(&self, tokens: &OAuthTokens) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopTokenStore;

#[async_trait]
impl TokenStore for NoopTokenStore {
    type Error = Infallible;

    async fn save_tokens(&self, _tokens: &OAuthTokens) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Everything needed to start an authorization-code flow with PKCE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

impl AuthorizationRequest {
    pub fn new(config: &AirtableConfig) -> Self {
        Self::with_secrets(config, random_token(24), random_token(48))
    }

    fn with_secrets(config: &AirtableConfig, state: String, code_verifier: String) -> Self {
        let challenge = code_challenge(&code_verifier);
        let query = [
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", config.scopes.as_str()),
            ("state", state.as_str()),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];
        let encoded = query
            .iter()
            .map(|(key, value)| format!("{key}={}", form_encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        Self {
            url: format!("{}?{encoded}", config.authorize_endpoint()),
            state,
            code_verifier,
        }
    }
}

/// S256 PKCE challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn form_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Trade an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &AirtableConfig,
    code: &str,
    code_verifier: &str,
) -> Result<OAuthTokens, OAuthError> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", config.redirect_uri.as_str()),
        ("client_id", config.client_id.as_str()),
        ("code_verifier", code_verifier),
    ];
    let payload = post_token_request(client, config, &form).await?;
    tokens_from_response(payload, None)
}

pub async fn refresh_access_token(
    client: &reqwest::Client,
    config: &AirtableConfig,
    tokens: &OAuthTokens,
) -> Result<OAuthTokens, OAuthError> {
    if tokens.refresh_token.is_empty() {
        return Err(OAuthError::MissingRefreshToken);
    }

    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", tokens.refresh_token.as_str()),
        ("client_id", config.client_id.as_str()),
    ];
    let payload = post_token_request(client, config, &form).await?;
    tokens_from_response(payload, Some(&tokens.refresh_token))
}

async fn post_token_request(
    client: &reqwest::Client,
    config: &AirtableConfig,
    form: &[(&str, &str)],
) -> Result<TokenResponse, OAuthError> {
    let mut request = client.post(config.token_endpoint()).form(form);
    if let Some(secret) = config.client_secret.as_deref().filter(|s| !s.is_empty()) {
        request = request.basic_auth(&config.client_id, Some(secret));
    }
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(OAuthError::Decode)
}

fn tokens_from_response(
    payload: TokenResponse,
    previous_refresh_token: Option<&str>,
) -> Result<OAuthTokens, OAuthError> {
    if payload.expires_in <= 0 {
        return Err(OAuthError::InvalidExpires(payload.expires_in));
    }

    let refresh_token = payload
        .refresh_token
        .filter(|token| !token.is_empty())
        .or_else(|| previous_refresh_token.map(str::to_string))
        .ok_or(OAuthError::MissingRefreshToken)?;

    Ok(OAuthTokens {
        access_token: payload.access_token,
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(payload.expires_in),
    })
}
