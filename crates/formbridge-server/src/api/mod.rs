//! HTTP API handlers for the form builder, public form viewer and Airtable webhooks.
//!
//! This module provides:
//! - Airtable login and session endpoints under `/auth`
//! - Builder endpoints (bases, tables, fields, forms, responses) under `/forms`
//! - Public form viewing, visibility and submission under `/forms/forms/{id}`
//! - Airtable record notifications under `/webhooks`

pub mod auth;
pub mod forms;
pub mod submissions;
pub mod webhooks;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use formbridge_core::{AirtableClient, AirtableClientError, User, UserRepository, UserTokenStore};
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Create the API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/forms", forms::router().merge(submissions::router()))
        .nest("/webhooks", webhooks::router())
}

/// Error response for API errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    pub fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Airtable client acting for `user`. Refreshed tokens are written back to the user row.
pub(crate) fn airtable_client(state: &AppState, user: &User) -> AirtableClient<UserTokenStore> {
    AirtableClient::new(
        state.http.clone(),
        state.config.airtable.clone(),
        user.tokens.clone(),
        Arc::new(UserTokenStore::new(
            UserRepository::new(state.db.clone()),
            user.id.clone(),
        )),
    )
}

/// Map an Airtable failure to the response the UI sees.
pub(crate) fn airtable_error(err: AirtableClientError, action: &str) -> Response {
    match &err {
        AirtableClientError::Unauthorized | AirtableClientError::OAuth(_) => {
            tracing::warn!(error = %err, "airtable rejected credentials while trying to {action}");
            ApiError::new(
                "airtable_unauthorized",
                "Airtable access expired, please sign in again",
            )
            .with_status(StatusCode::UNAUTHORIZED)
        }
        _ if err.is_not_found() => {
            ApiError::not_found(format!("Airtable could not find what was needed to {action}"))
                .with_status(StatusCode::NOT_FOUND)
        }
        _ => {
            tracing::error!(error = %err, "failed to {action}");
            ApiError::new("airtable_error", format!("Failed to {action}"))
                .with_status(StatusCode::BAD_GATEWAY)
        }
    }
}
