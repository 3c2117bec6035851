use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::airtable::{
    oauth::{DEFAULT_REFRESH_BUFFER, OAuthError, OAuthTokens, TokenStore, refresh_access_token},
    types::{AirtableRecord, Base, ListBasesResponse, ListTablesResponse, Table, TableField, WhoAmI},
};
use crate::config::AirtableConfig;

#[derive(Debug, Error)]
pub enum AirtableClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("token persistence error: {0}")]
    TokenStore(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unauthorized after refresh")]
    Unauthorized,
    #[error("airtable api error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("table {table} not found in base {base}")]
    TableNotFound { base: String, table: String },
}

impl AirtableClientError {
    /// Airtable's error type (`NOT_FOUND`, `INVALID_MULTIPLE_CHOICE_OPTIONS`, ...) when the
    /// API returned one.
    pub fn api_error_type(&self) -> Option<String> {
        let AirtableClientError::Api { body, .. } = self else {
            return None;
        };
        let parsed: Value = serde_json::from_str(body).ok()?;
        match parsed.get("error")? {
            Value::String(kind) => Some(kind.clone()),
            other => other.get("type")?.as_str().map(str::to_string),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AirtableClientError::TableNotFound { .. }
                | AirtableClientError::Api { status: 404, .. }
        )
    }
}

pub struct AirtableClient<S: TokenStore> {
    http: Client,
    config: AirtableConfig,
    tokens: RwLock<OAuthTokens>,
    refresh_lock: Mutex<()>,
    token_store: Arc<S>,
}

impl<S: TokenStore> AirtableClient<S> {
    pub fn new(
        http: Client,
        config: AirtableConfig,
        initial_tokens: OAuthTokens,
        token_store: Arc<S>,
    ) -> Self {
        Self {
            http,
            config,
            tokens: RwLock::new(initial_tokens),
            refresh_lock: Mutex::new(()),
            token_store,
        }
    }

    /// The tokens currently in use, including any refresh performed by this client.
    pub async fn current_tokens(&self) -> OAuthTokens {
        self.tokens.read().await.clone()
    }

    pub async fn whoami(&self) -> Result<WhoAmI, AirtableClientError> {
        let url = format!("{}/meta/whoami", self.config.api_base);
        self.send_json(|| self.http.get(&url)).await
    }

    /// All bases visible to the token, following `offset` pagination.
    pub async fn list_bases(&self) -> Result<Vec<Base>, AirtableClientError> {
        let url = format!("{}/meta/bases", self.config.api_base);
        let mut bases = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let page: ListBasesResponse = self
                .send_json(|| {
                    let builder = self.http.get(&url);
                    match offset.as_deref() {
                        Some(offset) => builder.query(&[("offset", offset)]),
                        None => builder,
                    }
                })
                .await?;
            bases.extend(page.bases);

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        Ok(bases)
    }

    pub async fn list_tables(&self, base_id: &str) -> Result<Vec<Table>, AirtableClientError> {
        let url = format!("{}/meta/bases/{}/tables", self.config.api_base, base_id);
        let response: ListTablesResponse = self.send_json(|| self.http.get(&url)).await?;
        Ok(response.tables)
    }

    /// Fields of one table. The table may be addressed by id or by name.
    pub async fn table_fields(
        &self,
        base_id: &str,
        table_id: &str,
    ) -> Result<Vec<TableField>, AirtableClientError> {
        let tables = self.list_tables(base_id).await?;
        tables
            .into_iter()
            .find(|table| table.id == table_id || table.name == table_id)
            .map(|table| table.fields)
            .ok_or_else(|| AirtableClientError::TableNotFound {
                base: base_id.to_string(),
                table: table_id.to_string(),
            })
    }

    pub async fn create_record(
        &self,
        base_id: &str,
        table_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<AirtableRecord, AirtableClientError> {
        let url = format!("{}/{}/{}", self.config.api_base, base_id, table_id);
        let body = json!({ "fields": fields });
        let record: AirtableRecord = self
            .send_json(|| self.http.post(&url).json(&body))
            .await?;
        debug!(base_id, table_id, record_id = %record.id, "created airtable record");
        Ok(record)
    }

    async fn send_json<T, B>(&self, build: B) -> Result<T, AirtableClientError>
    where
        T: DeserializeOwned,
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let response = self.perform_authenticated(build).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(AirtableClientError::Decode)
    }

    async fn perform_authenticated<B>(
        &self,
        build: B,
    ) -> Result<reqwest::Response, AirtableClientError>
    where
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let tokens = self.ensure_fresh_token(false).await?;
        let mut response = build().bearer_auth(&tokens.access_token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let tokens = self.ensure_fresh_token(true).await?;
            response = build().bearer_auth(&tokens.access_token).send().await?;
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AirtableClientError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AirtableClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn ensure_fresh_token(
        &self,
        force_refresh: bool,
    ) -> Result<OAuthTokens, AirtableClientError> {
        {
            let tokens = self.tokens.read().await;
            if !force_refresh && !tokens.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER) {
                return Ok(tokens.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another request may have refreshed while we waited for the lock.
        let current = { self.tokens.read().await.clone() };
        if !force_refresh && !current.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER) {
            return Ok(current);
        }

        let refreshed = refresh_access_token(&self.http, &self.config, &current).await?;
        {
            let mut tokens = self.tokens.write().await;
            *tokens = refreshed.clone();
        }

        self.token_store
            .save_tokens(&refreshed)
            .await
            .map_err(|err| AirtableClientError::TokenStore(err.to_string()))?;

        Ok(refreshed)
    }
}
