use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use ts_rs::TS;

use crate::airtable::TableField;
use crate::forms::types::{Form, Question};
use crate::visibility::{Answers, is_present};

/// Airtable fields to write for an accepted submission, keyed by field id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidatedSubmission {
    pub fields: Map<String, Value>,
}

/// Every problem found in a submission, in question order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("submission rejected: {}", .0.join("; "))]
pub struct SubmissionErrors(pub Vec<String>);

/// Validate a submission against the form and the live table schema.
///
/// Visibility is decided from the full submitted answers. Hidden questions are
/// neither validated nor written, even when an answer was supplied for them.
pub fn validate_submission(
    form: &Form,
    answers: &Answers,
    table_fields: &[TableField],
) -> Result<ValidatedSubmission, SubmissionErrors> {
    let fields_by_id: HashMap<&str, &TableField> = table_fields
        .iter()
        .map(|field| (field.id.as_str(), field))
        .collect();

    let mut fields = Map::new();
    let mut errors = Vec::new();

    for question in &form.questions {
        if !question.is_visible(answers) {
            continue;
        }

        let answer = answers.get(&question.question_key).filter(|a| is_present(a));
        let Some(answer) = answer else {
            if question.required {
                errors.push(format!("{} is required", question.label));
            }
            continue;
        };

        if question.required && answer.as_array().is_some_and(Vec::is_empty) {
            errors.push(format!("{} is required", question.label));
            continue;
        }

        let field = fields_by_id.get(question.airtable_field_id.as_str()).copied();
        match question.question_type.validate_answer(answer, field) {
            Ok(value) => {
                fields.insert(question.airtable_field_id.clone(), value);
            }
            Err(err) => errors.push(format!("{}: {err}", question.label)),
        }
    }

    if errors.is_empty() {
        Ok(ValidatedSubmission { fields })
    } else {
        Err(SubmissionErrors(errors))
    }
}

/// The questions a viewer should currently see, with answers to hidden
/// questions dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RenderPlan {
    pub visible: Vec<String>,
    #[ts(type = "Record<string, unknown>")]
    pub answers: Answers,
}

pub fn render_plan(form: &Form, answers: &Answers) -> RenderPlan {
    let visible: Vec<&Question> = form
        .questions
        .iter()
        .filter(|question| question.is_visible(answers))
        .collect();

    let pruned = visible
        .iter()
        .filter_map(|question| {
            answers
                .get(&question.question_key)
                .map(|answer| (question.question_key.clone(), answer.clone()))
        })
        .collect();

    RenderPlan {
        visible: visible
            .iter()
            .map(|question| question.question_key.clone())
            .collect(),
        answers: pruned,
    }
}
