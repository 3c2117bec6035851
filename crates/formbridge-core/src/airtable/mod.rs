//! Airtable OAuth and REST access.

pub mod client;
pub mod oauth;
pub mod types;

pub use client::{AirtableClient, AirtableClientError};
pub use oauth::{
    AuthorizationRequest, DEFAULT_REFRESH_BUFFER, NoopTokenStore, OAuthError, OAuthTokens,
    TokenStore, code_challenge, exchange_code, refresh_access_token,
};
pub use types::{
    AirtableRecord, Base, SupportedField, Table, TableField, WhoAmI, is_supported_field_type,
    map_field_type, supported_fields,
};
