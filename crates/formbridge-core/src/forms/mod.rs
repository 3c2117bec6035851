//! Form definitions, their storage, and the two consumers of question visibility:
//! the render plan and submission validation.

pub mod definition;
pub mod repository;
pub mod submission;
pub mod types;

pub use definition::{DefinitionError, FormDefinitionRequest, validate_definition};
pub use repository::{FormError, FormRepository};
pub use submission::{
    RenderPlan, SubmissionErrors, ValidatedSubmission, render_plan, validate_submission,
};
pub use types::{AnswerError, Form, FormDefinition, FormSummary, Question, QuestionType};
