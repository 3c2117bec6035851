use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::airtable::{OAuthTokens, TokenStore};
use crate::db::{Database, DbError, now_rfc3339, parse_timestamp};

const USER_COLUMNS: &str = "id, airtable_user_id, email, profile_json, tokens_json, \
                            last_login_at, created_at, updated_at";

/// An Airtable account that has signed in.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub airtable_user_id: String,
    pub email: Option<String>,
    pub profile: Value,
    pub tokens: OAuthTokens,
    pub last_login_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the dashboard is told about the signed-in user. Never carries tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserSummary {
    pub id: String,
    pub airtable_user_id: String,
    pub email: Option<String>,
    pub last_login_at: DateTime<Utc>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            airtable_user_id: user.airtable_user_id.clone(),
            email: user.email.clone(),
            last_login_at: user.last_login_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("user not found: {0}")]
    NotFound(String),
}

#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create or refresh the user for an Airtable account after a successful login.
    pub async fn upsert_login(
        &self,
        airtable_user_id: &str,
        email: Option<&str>,
        profile: &Value,
        tokens: &OAuthTokens,
    ) -> Result<User, UserError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let profile_json = serde_json::to_string(profile)?;
        let tokens_json = serde_json::to_string(tokens)?;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO users (
                        id, airtable_user_id, email, profile_json, tokens_json,
                        last_login_at, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)
                    ON CONFLICT(airtable_user_id) DO UPDATE SET
                        email = COALESCE(excluded.email, users.email),
                        profile_json = excluded.profile_json,
                        tokens_json = excluded.tokens_json,
                        last_login_at = excluded.last_login_at,
                        updated_at = excluded.updated_at
                    RETURNING {USER_COLUMNS}"
                ),
                params![
                    id,
                    airtable_user_id,
                    email.map(str::to_string),
                    profile_json,
                    tokens_json,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_user(row),
            None => Err(UserError::NotFound(airtable_user_id.to_string())),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<User, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_user(row),
            None => Err(UserError::NotFound(id.to_string())),
        }
    }

    pub async fn update_tokens(&self, id: &str, tokens: &OAuthTokens) -> Result<(), UserError> {
        let tokens_json = serde_json::to_string(tokens)?;
        let conn = self.db.connection().await?;
        let updated = conn
            .execute(
                "UPDATE users SET tokens_json = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, tokens_json, now_rfc3339()],
            )
            .await?;

        if updated == 0 {
            return Err(UserError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn row_to_user(row: Row) -> Result<User, UserError> {
    let profile_json: String = row.get(3)?;
    let tokens_json: String = row.get(4)?;
    let last_login_at: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(User {
        id: row.get(0)?,
        airtable_user_id: row.get(1)?,
        email: row.get(2)?,
        profile: serde_json::from_str(&profile_json)?,
        tokens: serde_json::from_str(&tokens_json)?,
        last_login_at: parse_timestamp(&last_login_at)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Writes refreshed Airtable tokens back to the owning user row.
#[derive(Clone)]
pub struct UserTokenStore {
    repo: UserRepository,
    user_id: String,
}

impl UserTokenStore {
    pub fn new(repo: UserRepository, user_id: impl Into<String>) -> Self {
        Self {
            repo,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl TokenStore for UserTokenStore {
    type Error = UserError;

    async fn save_tokens(&self, tokens: &OAuthTokens) -> Result<(), Self::Error> {
        self.repo.update_tokens(&self.user_id, tokens).await
    }
}
