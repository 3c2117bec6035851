//! Airtable record notifications.
//!
//! Provides:
//! - POST /webhooks/airtable - Keep stored responses in step with Airtable edits and deletions

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use formbridge_core::ResponseRepository;
use formbridge_core::api::WebhookAck;
use formbridge_core::webhooks::{WebhookError, WebhookEvent, apply_event, verify_signature};

use crate::AppState;
use crate::api::ApiError;

pub const SIGNATURE_HEADER: &str = "x-airtable-signature";

/// Create the webhooks router.
pub fn router() -> Router<AppState> {
    Router::new().route("/airtable", post(airtable_webhook))
}

/// POST /webhooks/airtable
///
/// The signature covers the raw body, so the payload is read as bytes and
/// parsed only after it checks out.
async fn airtable_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(e) = verify_signature(state.config.webhooks.secret.as_deref(), signature, &body) {
        let message = match e {
            WebhookError::MissingSignature => "Missing signature",
            _ => "Invalid signature",
        };
        tracing::warn!("Rejected airtable webhook: {}", e);
        return ApiError::unauthorized(message).with_status(StatusCode::UNAUTHORIZED);
    }

    let event = match WebhookEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Unreadable airtable webhook: {}", e);
            return ApiError::bad_request("Invalid webhook payload")
                .with_status(StatusCode::BAD_REQUEST);
        }
    };

    match apply_event(&ResponseRepository::new(state.db.clone()), &event).await {
        Ok(_) => Json(WebhookAck { received: true }).into_response(),
        Err(e) => {
            tracing::error!("Failed to apply airtable webhook: {}", e);
            ApiError::internal("Webhook processing failed")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
