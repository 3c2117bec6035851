//! API types for web UI communication.

pub mod types;

pub use types::{
    AnswersRequest, BasesResponse, FieldsResponse, FormBody, FormsResponse, MeResponse,
    ResponsesResponse, SubmissionAccepted, SubmissionRejected, TablesResponse, WebhookAck,
};
