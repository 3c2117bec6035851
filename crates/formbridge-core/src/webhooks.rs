use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info};

use crate::responses::{ResponseError, ResponseRepository};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("response store error: {0}")]
    Responses(#[from] ResponseError),
}

/// Check `X-Airtable-Signature` against the raw body. With no secret configured
/// every payload is accepted.
pub fn verify_signature(
    secret: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
) -> Result<(), WebhookError> {
    let Some(secret) = secret.filter(|secret| !secret.is_empty()) else {
        return Ok(());
    };
    let signature = signature
        .map(str::trim)
        .filter(|signature| !signature.is_empty())
        .ok_or(WebhookError::MissingSignature)?;
    let expected = hex::decode(signature).map_err(|_| WebhookError::InvalidSignature)?;

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// A record notification from Airtable.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    RecordChanged {
        record_id: String,
        changed_fields: Option<Map<String, Value>>,
    },
    RecordDeleted {
        record_id: String,
    },
    Ignored {
        event_type: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    event_type: Option<Value>,
    #[serde(default)]
    record_id: Option<Value>,
    #[serde(default)]
    changed_fields: Option<Value>,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        let raw: RawEvent = serde_json::from_slice(body)?;
        let changed_fields = match raw.changed_fields {
            Some(Value::Object(fields)) => Some(fields),
            _ => None,
        };

        // Non-string type or id values are treated like any unrecognised event.
        let event_type = raw.event_type.as_ref().and_then(Value::as_str);
        let record_id = raw
            .record_id
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(match (event_type, record_id) {
            (Some("record.created" | "record.updated"), Some(record_id)) => {
                WebhookEvent::RecordChanged {
                    record_id,
                    changed_fields,
                }
            }
            (Some("record.deleted"), Some(record_id)) => WebhookEvent::RecordDeleted { record_id },
            _ => WebhookEvent::Ignored {
                event_type: event_type.map(str::to_string),
            },
        })
    }
}

/// What applying an event did to the stored responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Updated,
    Deleted,
    UnknownRecord,
    Ignored,
}

pub async fn apply_event(
    responses: &ResponseRepository,
    event: &WebhookEvent,
) -> Result<WebhookOutcome, WebhookError> {
    let outcome = match event {
        WebhookEvent::RecordChanged {
            record_id,
            changed_fields,
        } => match responses
            .apply_record_change(record_id, changed_fields.as_ref())
            .await?
        {
            Some(_) => WebhookOutcome::Updated,
            None => WebhookOutcome::UnknownRecord,
        },
        WebhookEvent::RecordDeleted { record_id } => {
            match responses.mark_deleted(record_id).await? {
                Some(_) => WebhookOutcome::Deleted,
                None => WebhookOutcome::UnknownRecord,
            }
        }
        WebhookEvent::Ignored { event_type } => {
            debug!(event_type = ?event_type, "ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }
    };

    info!(?outcome, "applied airtable webhook");
    Ok(outcome)
}
