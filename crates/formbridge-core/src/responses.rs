use chrono::{DateTime, Utc};
use libsql::{Row, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::db::{Database, DbError, now_rfc3339, parse_timestamp};
use crate::visibility::Answers;

const RESPONSE_COLUMNS: &str =
    "id, form_id, airtable_record_id, answers_json, status, created_at, updated_at";

/// Number of answers included in a response listing preview.
pub const PREVIEW_ANSWER_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum ResponseStatus {
    Active,
    DeletedInAirtable,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Active => "active",
            ResponseStatus::DeletedInAirtable => "deletedInAirtable",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ResponseError> {
        match value {
            "active" => Ok(ResponseStatus::Active),
            "deletedInAirtable" => Ok(ResponseStatus::DeletedInAirtable),
            other => Err(ResponseError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FormResponse {
    pub id: String,
    pub form_id: String,
    pub airtable_record_id: String,
    #[ts(type = "Record<string, unknown>")]
    pub answers: Answers,
    pub status: ResponseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A response as shown in the responses list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ResponsePreview {
    pub id: String,
    pub airtable_record_id: String,
    pub created_at: DateTime<Utc>,
    pub status: ResponseStatus,
    #[ts(type = "Record<string, unknown>")]
    pub preview_answers: Answers,
}

impl From<FormResponse> for ResponsePreview {
    fn from(response: FormResponse) -> Self {
        let preview_answers = response
            .answers
            .into_iter()
            .take(PREVIEW_ANSWER_COUNT)
            .collect();
        Self {
            id: response.id,
            airtable_record_id: response.airtable_record_id,
            created_at: response.created_at,
            status: response.status,
            preview_answers,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("invalid response status: {0}")]
    InvalidStatus(String),
    #[error("response not found: {0}")]
    NotFound(String),
}

#[derive(Clone)]
pub struct ResponseRepository {
    db: Database,
}

impl ResponseRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record an accepted submission. New responses are always `active`.
    pub async fn create(
        &self,
        form_id: &str,
        airtable_record_id: &str,
        answers: &Answers,
    ) -> Result<FormResponse, ResponseError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let answers_json = serde_json::to_string(answers)?;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO responses (
                        id, form_id, airtable_record_id, answers_json, status,
                        created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                    RETURNING {RESPONSE_COLUMNS}"
                ),
                params![
                    id.as_str(),
                    form_id,
                    airtable_record_id,
                    answers_json,
                    ResponseStatus::Active.as_str(),
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_response(row),
            None => Err(ResponseError::NotFound(id)),
        }
    }

    /// Responses for a form, newest first.
    pub async fn list_for_form(&self, form_id: &str) -> Result<Vec<FormResponse>, ResponseError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RESPONSE_COLUMNS} FROM responses
                     WHERE form_id = ?1
                     ORDER BY created_at DESC, id DESC"
                ),
                params![form_id],
            )
            .await?;

        let mut responses = Vec::new();
        while let Some(row) = rows.next().await? {
            responses.push(row_to_response(row)?);
        }
        Ok(responses)
    }

    pub async fn find_by_record_id(
        &self,
        airtable_record_id: &str,
    ) -> Result<Option<FormResponse>, ResponseError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {RESPONSE_COLUMNS} FROM responses WHERE airtable_record_id = ?1"),
                params![airtable_record_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_response(row)?)),
            None => Ok(None),
        }
    }

    /// Merge changed Airtable fields into the stored answers and mark the response
    /// active again. Returns `None` when no response tracks the record.
    ///
    /// The read and the write share an immediate transaction so concurrent
    /// notifications for one record serialize instead of overwriting each other.
    pub async fn apply_record_change(
        &self,
        airtable_record_id: &str,
        changed_fields: Option<&Map<String, serde_json::Value>>,
    ) -> Result<Option<FormResponse>, ResponseError> {
        let conn = self.db.connection().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await?;

        let mut rows = tx
            .query(
                &format!("SELECT {RESPONSE_COLUMNS} FROM responses WHERE airtable_record_id = ?1"),
                params![airtable_record_id],
            )
            .await?;
        let existing = match rows.next().await? {
            Some(row) => Some(row_to_response(row)?),
            None => None,
        };
        drop(rows);
        let Some(existing) = existing else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut answers = existing.answers;
        if let Some(changed) = changed_fields {
            for (key, value) in changed {
                answers.insert(key.clone(), value.clone());
            }
        }

        let mut rows = tx
            .query(
                &format!(
                    "UPDATE responses
                     SET answers_json = ?2, status = ?3, updated_at = ?4
                     WHERE id = ?1
                     RETURNING {RESPONSE_COLUMNS}"
                ),
                params![
                    existing.id.as_str(),
                    serde_json::to_string(&answers)?,
                    ResponseStatus::Active.as_str(),
                    now_rfc3339()
                ],
            )
            .await?;
        let updated = match rows.next().await? {
            Some(row) => row_to_response(row)?,
            None => return Err(ResponseError::NotFound(existing.id)),
        };
        drop(rows);

        tx.commit().await?;
        Ok(Some(updated))
    }

    /// Flag the response for a record deleted in Airtable. Returns `None` when no
    /// response tracks the record.
    pub async fn mark_deleted(
        &self,
        airtable_record_id: &str,
    ) -> Result<Option<FormResponse>, ResponseError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE responses
                     SET status = ?2, updated_at = ?3
                     WHERE airtable_record_id = ?1
                     RETURNING {RESPONSE_COLUMNS}"
                ),
                params![
                    airtable_record_id,
                    ResponseStatus::DeletedInAirtable.as_str(),
                    now_rfc3339()
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_response(row)?)),
            None => Ok(None),
        }
    }
}

fn row_to_response(row: Row) -> Result<FormResponse, ResponseError> {
    let answers_json: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(FormResponse {
        id: row.get(0)?,
        form_id: row.get(1)?,
        airtable_record_id: row.get(2)?,
        answers: serde_json::from_str(&answers_json)?,
        status: ResponseStatus::parse(&status)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
