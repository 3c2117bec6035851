pub mod airtable;
pub mod api;
pub mod config;
pub mod db;
pub mod forms;
pub mod migrations;
pub mod responses;
pub mod session;
pub mod telemetry;
pub mod users;
pub mod visibility;
pub mod webhooks;

pub use airtable::{AirtableClient, AirtableClientError, OAuthError, OAuthTokens, TokenStore};
pub use config::Config;
pub use db::Database;
pub use forms::{Form, FormError, FormRepository, Question, QuestionType};
pub use responses::{FormResponse, ResponseError, ResponseRepository, ResponseStatus};
pub use session::{SessionError, SessionSigner};
pub use telemetry::{TelemetryError, TelemetryGuard, init_telemetry};
pub use users::{User, UserError, UserRepository, UserTokenStore};
pub use visibility::{Answers, ConditionalRuleSet, should_show_question};
