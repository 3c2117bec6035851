//! Request and response bodies for the web UI.
//!
//! Every list is wrapped in a named field so the UI can grow a response
//! without breaking older clients.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::airtable::{Base, SupportedField, Table};
use crate::forms::{Form, FormSummary};
use crate::responses::{FormResponse, ResponsePreview};
use crate::users::UserSummary;
use crate::visibility::Answers;

/// Answers posted by a form viewer, for both the visibility check and submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AnswersRequest {
    #[serde(default)]
    #[ts(type = "Record<string, unknown>")]
    pub answers: Answers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BasesResponse {
    pub bases: Vec<Base>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TablesResponse {
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FieldsResponse {
    pub fields: Vec<SupportedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FormBody {
    pub form: Form,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FormsResponse {
    pub forms: Vec<FormSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ResponsesResponse {
    pub responses: Vec<ResponsePreview>,
}

/// Body of a 201 from the submit endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubmissionAccepted {
    pub response: FormResponse,
}

/// Body of a 400 from the submit endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SubmissionRejected {
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MeResponse {
    pub user: UserSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WebhookAck {
    pub received: bool,
}
