use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use ts_rs::TS;

use crate::airtable::TableField;
use crate::visibility::{
    Answers, ConditionalRuleSet, lenient_rules, should_show_question, string_form,
};

/// The closed set of question kinds a form can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum QuestionType {
    SingleLineText,
    LongText,
    SingleSelect,
    MultipleSelects,
    Attachments,
}

/// Why an answer could not be written to its Airtable field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerError {
    #[error("invalid choice")]
    InvalidChoice,
    #[error("invalid choices: {}", .0.join(", "))]
    InvalidChoices(Vec<String>),
    #[error("must be an array")]
    NotAnArray,
    #[error("must be a URL or array of URLs")]
    NotUrls,
}

impl QuestionType {
    pub const ALL: [QuestionType; 5] = [
        QuestionType::SingleLineText,
        QuestionType::LongText,
        QuestionType::SingleSelect,
        QuestionType::MultipleSelects,
        QuestionType::Attachments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::SingleLineText => "singleLineText",
            QuestionType::LongText => "longText",
            QuestionType::SingleSelect => "singleSelect",
            QuestionType::MultipleSelects => "multipleSelects",
            QuestionType::Attachments => "attachments",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Check a present answer and convert it to the value written to Airtable.
    ///
    /// Select answers are only checked against choices when the table field
    /// lists them.
    pub fn validate_answer(
        &self,
        answer: &Value,
        field: Option<&TableField>,
    ) -> Result<Value, AnswerError> {
        let choices = field.and_then(TableField::choice_names);
        match self {
            QuestionType::SingleLineText | QuestionType::LongText => {
                Ok(Value::String(string_form(answer).into_owned()))
            }
            QuestionType::SingleSelect => match &choices {
                Some(choices) if !is_choice(answer, choices) => Err(AnswerError::InvalidChoice),
                _ => Ok(answer.clone()),
            },
            QuestionType::MultipleSelects => {
                let Value::Array(selected) = answer else {
                    return Err(AnswerError::NotAnArray);
                };
                if let Some(choices) = &choices {
                    let invalid: Vec<String> = selected
                        .iter()
                        .filter(|item| !is_choice(item, choices))
                        .map(|item| string_form(item).into_owned())
                        .collect();
                    if !invalid.is_empty() {
                        return Err(AnswerError::InvalidChoices(invalid));
                    }
                }
                Ok(answer.clone())
            }
            QuestionType::Attachments => {
                let urls = match answer {
                    Value::String(url) => vec![url.as_str()],
                    Value::Array(items) => items
                        .iter()
                        .map(Value::as_str)
                        .collect::<Option<Vec<_>>>()
                        .ok_or(AnswerError::NotUrls)?,
                    _ => return Err(AnswerError::NotUrls),
                };
                Ok(Value::Array(
                    urls.into_iter().map(|url| json!({ "url": url })).collect(),
                ))
            }
        }
    }
}

fn is_choice(answer: &Value, choices: &[String]) -> bool {
    answer
        .as_str()
        .is_some_and(|answer| choices.iter().any(|choice| choice == answer))
}

/// One question of a form, bound to an Airtable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Question {
    pub question_key: String,
    pub airtable_field_id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, deserialize_with = "lenient_rules")]
    pub conditional_rules: Option<ConditionalRuleSet>,
    #[serde(default = "empty_object")]
    #[ts(type = "Record<string, unknown>")]
    pub options: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Question {
    pub fn is_visible(&self, answers: &Answers) -> bool {
        should_show_question(self.conditional_rules.as_ref(), answers)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Form {
    pub id: String,
    pub owner_user_id: String,
    pub airtable_base_id: String,
    pub airtable_table_id: String,
    pub title: String,
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated data for a new form, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct FormDefinition {
    pub airtable_base_id: String,
    pub airtable_table_id: String,
    pub title: String,
    pub questions: Vec<Question>,
}

/// The dashboard listing view of a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FormSummary {
    pub id: String,
    pub title: String,
    pub airtable_base_id: String,
    pub airtable_table_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Form> for FormSummary {
    fn from(form: &Form) -> Self {
        Self {
            id: form.id.clone(),
            title: form.title.clone(),
            airtable_base_id: form.airtable_base_id.clone(),
            airtable_table_id: form.airtable_table_id.clone(),
            created_at: form.created_at,
            updated_at: form.updated_at,
        }
    }
}
