//! Airtable login and session endpoints.
//!
//! Provides:
//! - GET /auth/airtable - Start the Airtable OAuth flow
//! - GET /auth/airtable/callback - Finish the flow and start a session
//! - GET /auth/me - The signed-in user
//! - POST /auth/logout - End the session

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Query, State},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Utc;
use formbridge_core::airtable::{AuthorizationRequest, NoopTokenStore, exchange_code};
use formbridge_core::api::MeResponse;
use formbridge_core::users::UserSummary;
use formbridge_core::{AirtableClient, User, UserError, UserRepository};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::api::{ApiError, airtable_error};

pub const SESSION_COOKIE: &str = "token";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

/// Create the auth router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/airtable", get(start_login))
        .route("/airtable/callback", get(oauth_callback))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

/// The user behind the request's session, taken from the `token` cookie or an
/// `Authorization: Bearer` header.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            cookie_value(&parts.headers, SESSION_COOKIE).or_else(|| bearer_token(&parts.headers));
        let Some(token) = token else {
            return Err(ApiError::unauthorized("Authentication required")
                .with_status(StatusCode::UNAUTHORIZED));
        };

        let claims = state
            .sessions
            .verify_session(&token, Utc::now())
            .map_err(|_| {
                ApiError::unauthorized("Invalid or expired token")
                    .with_status(StatusCode::UNAUTHORIZED)
            })?;

        match UserRepository::new(state.db.clone()).get_by_id(&claims.sub).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(UserError::NotFound(_)) => {
                Err(ApiError::unauthorized("User not found").with_status(StatusCode::UNAUTHORIZED))
            }
            Err(e) => {
                tracing::error!("Failed to load session user {}: {}", claims.sub, e);
                Err(ApiError::internal("Failed to load user")
                    .with_status(StatusCode::INTERNAL_SERVER_ERROR))
            }
        }
    }
}

pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn set_cookie(name: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}{secure}")
}

fn oauth_not_configured() -> Response {
    ApiError::new(
        "oauth_not_configured",
        "OAuth not configured. Set airtable.client_id and airtable.redirect_uri.",
    )
    .with_status(StatusCode::INTERNAL_SERVER_ERROR)
}

/// GET /auth/airtable
///
/// Redirect to Airtable's consent page. The state and PKCE verifier travel in a
/// signed cookie so the callback can check them.
async fn start_login(State(state): State<AppState>) -> Response {
    if !state.config.airtable.is_configured() {
        return oauth_not_configured();
    }

    let request = AuthorizationRequest::new(&state.config.airtable);
    let cookie = match state
        .sessions
        .issue_oauth_state(&request.state, &request.code_verifier, Utc::now())
    {
        Ok(value) => set_cookie(
            OAUTH_STATE_COOKIE,
            &value,
            formbridge_core::session::OAUTH_STATE_TTL.num_seconds(),
            state.config.session.secure_cookies,
        ),
        Err(e) => {
            tracing::error!("Failed to sign oauth state: {}", e);
            return ApiError::internal("Failed to start login")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Redirect::to(&request.url),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GET /auth/airtable/callback
///
/// Exchange the code, record the Airtable user and start a session.
async fn oauth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or_else(|| {
            "Check that the redirect URI matches the Airtable app settings".into()
        });
        return ApiError::new("oauth_error", format!("OAuth error: {error}. {detail}"))
            .with_status(StatusCode::BAD_REQUEST);
    }

    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        return ApiError::bad_request("Authorization code missing")
            .with_status(StatusCode::BAD_REQUEST);
    };

    if !state.config.airtable.is_configured() {
        return oauth_not_configured();
    }

    let now = Utc::now();
    let login = cookie_value(&headers, OAUTH_STATE_COOKIE)
        .and_then(|value| state.sessions.verify_oauth_state(&value, now).ok());
    let Some(login) = login.filter(|login| query.state.as_deref() == Some(login.state.as_str()))
    else {
        return ApiError::new("invalid_state", "Login attempt expired or did not start here")
            .with_status(StatusCode::BAD_REQUEST);
    };

    let airtable = &state.config.airtable;
    let tokens = match exchange_code(&state.http, airtable, &code, &login.verifier).await {
        Ok(tokens) => tokens,
        Err(e) if e.is_configuration_error() => {
            tracing::warn!("Airtable rejected the authorization code: {}", e);
            let detail = e.error_description().unwrap_or_else(|| {
                "Invalid client_id, client_secret, or redirect_uri".to_string()
            });
            return ApiError::new("oauth_configuration_error", detail)
                .with_status(StatusCode::BAD_REQUEST);
        }
        Err(e) => {
            tracing::error!("Failed to exchange authorization code: {}", e);
            return ApiError::new("authentication_failed", "Authentication failed")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let client = AirtableClient::new(
        state.http.clone(),
        airtable.clone(),
        tokens,
        Arc::new(NoopTokenStore),
    );
    let profile = match client.whoami().await {
        Ok(profile) => profile,
        Err(e) => return airtable_error(e, "load the Airtable profile"),
    };
    let tokens = client.current_tokens().await;

    let repo = UserRepository::new(state.db.clone());
    let profile_json = serde_json::to_value(&profile).unwrap_or_else(|_| json!({}));
    let user = match repo
        .upsert_login(&profile.id, profile.email.as_deref(), &profile_json, &tokens)
        .await
    {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("Failed to save user {}: {}", profile.id, e);
            return ApiError::internal("Failed to save user")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let session = match state.sessions.issue_session(&user.id, now) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to sign session: {}", e);
            return ApiError::internal("Failed to start session")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    tracing::info!(user_id = %user.id, "airtable login completed");
    let secure = state.config.session.secure_cookies;
    (
        AppendHeaders([
            (
                header::SET_COOKIE,
                set_cookie(
                    SESSION_COOKIE,
                    &session,
                    state.sessions.ttl().num_seconds(),
                    secure,
                ),
            ),
            (header::SET_COOKIE, set_cookie(OAUTH_STATE_COOKIE, "", 0, secure)),
        ]),
        Redirect::to(&format!(
            "{}/dashboard",
            state.config.app.frontend_url.trim_end_matches('/')
        )),
    )
        .into_response()
}

/// GET /auth/me
async fn me(AuthUser(user): AuthUser) -> impl IntoResponse {
    Json(MeResponse {
        user: UserSummary::from(&user),
    })
}

/// POST /auth/logout
async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        AppendHeaders([(
            header::SET_COOKIE,
            set_cookie(SESSION_COOKIE, "", 0, state.config.session.secure_cookies),
        )]),
        Json(json!({ "message": "Logged out" })),
    )
}
