use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::forms::types::{FormDefinition, Question, QuestionType};
use crate::visibility::ConditionalRuleSet;

/// A form definition as posted by the builder, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDefinitionRequest {
    #[serde(default)]
    pub airtable_base_id: Option<String>,
    #[serde(default)]
    pub airtable_table_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub questions: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Missing required fields")]
    MissingRequiredFields,
    #[error("Invalid question format")]
    InvalidQuestion { index: usize },
    #[error("Unsupported question type: {0}")]
    UnsupportedQuestionType(String),
    #[error("Duplicate question key: {0}")]
    DuplicateQuestionKey(String),
    #[error("Invalid conditional rule format")]
    InvalidConditionalRule { question_key: String },
}

/// Check a builder payload and turn it into a storable definition.
pub fn validate_definition(
    request: &FormDefinitionRequest,
) -> Result<FormDefinition, DefinitionError> {
    let (Some(base_id), Some(table_id), Some(title), Some(Value::Array(raw_questions))) = (
        non_blank(request.airtable_base_id.as_deref()),
        non_blank(request.airtable_table_id.as_deref()),
        non_blank(request.title.as_deref()),
        request.questions.as_ref(),
    ) else {
        return Err(DefinitionError::MissingRequiredFields);
    };

    let mut seen = HashSet::new();
    let mut questions = Vec::with_capacity(raw_questions.len());
    for (index, raw) in raw_questions.iter().enumerate() {
        let question = parse_question(index, raw)?;
        if !seen.insert(question.question_key.clone()) {
            return Err(DefinitionError::DuplicateQuestionKey(question.question_key));
        }
        questions.push(question);
    }

    Ok(FormDefinition {
        airtable_base_id: base_id.to_string(),
        airtable_table_id: table_id.to_string(),
        title: title.trim().to_string(),
        questions,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_question(index: usize, raw: &Value) -> Result<Question, DefinitionError> {
    let invalid = || DefinitionError::InvalidQuestion { index };
    let object = raw.as_object().ok_or_else(invalid)?;

    let question_key = required_str(object, "questionKey").ok_or_else(invalid)?;
    let airtable_field_id = required_str(object, "airtableFieldId").ok_or_else(invalid)?;
    let label = required_str(object, "label").ok_or_else(invalid)?;
    let type_name = required_str(object, "type").ok_or_else(invalid)?;
    let question_type = QuestionType::parse(type_name)
        .ok_or_else(|| DefinitionError::UnsupportedQuestionType(type_name.to_string()))?;

    let required = match object.get("required") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(required)) => *required,
        Some(_) => return Err(invalid()),
    };

    let conditional_rules = match object.get("conditionalRules") {
        None | Some(Value::Null) => None,
        Some(rules) => parse_rules(question_key, rules)?,
    };

    let options = match object.get("options") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(options @ Value::Object(_)) => options.clone(),
        Some(_) => return Err(invalid()),
    };

    Ok(Question {
        question_key: question_key.to_string(),
        airtable_field_id: airtable_field_id.to_string(),
        label: label.to_string(),
        question_type,
        required,
        conditional_rules,
        options,
    })
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Rule sets are checked strictly here so the lenient reader only ever sees
/// drifted data, never fresh input.
fn parse_rules(
    question_key: &str,
    rules: &Value,
) -> Result<Option<ConditionalRuleSet>, DefinitionError> {
    let invalid = || DefinitionError::InvalidConditionalRule {
        question_key: question_key.to_string(),
    };
    let object = rules.as_object().ok_or_else(invalid)?;

    match object.get("logic") {
        None | Some(Value::Null) => {}
        Some(Value::String(logic)) if logic == "AND" || logic == "OR" => {}
        Some(_) => return Err(invalid()),
    }

    match object.get("conditions") {
        None | Some(Value::Null) => {}
        Some(Value::Array(conditions)) => {
            for condition in conditions {
                let condition = condition.as_object().ok_or_else(invalid)?;
                let has_key = required_str(condition, "questionKey").is_some();
                let has_operator = matches!(
                    condition.get("operator").and_then(Value::as_str),
                    Some("equals" | "notEquals" | "contains")
                );
                // A null value is as unusable as a missing one.
                let has_value = !matches!(condition.get("value"), None | Some(Value::Null));
                if !(has_key && has_operator && has_value) {
                    return Err(invalid());
                }
            }
        }
        Some(_) => return Err(invalid()),
    }

    Ok(ConditionalRuleSet::from_stored(rules.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::{Condition, ConditionOperator, LogicOperator};
    use serde_json::json;

    fn request(questions: Value) -> FormDefinitionRequest {
        FormDefinitionRequest {
            airtable_base_id: Some("app1".into()),
            airtable_table_id: Some("tbl1".into()),
            title: Some("  Job application ".into()),
            questions: Some(questions),
        }
    }

    fn question(key: &str, kind: &str) -> Value {
        json!({
            "questionKey": key,
            "airtableFieldId": format!("fld_{key}"),
            "label": key.to_uppercase(),
            "type": kind,
        })
    }

    #[test]
    fn accepts_a_complete_definition() {
        let mut follow_up = question("q2", "longText");
        follow_up["required"] = json!(true);
        follow_up["conditionalRules"] = json!({
            "logic": "OR",
            "conditions": [{ "questionKey": "q1", "operator": "equals", "value": "Engineer" }]
        });

        let definition = validate_definition(&request(json!([
            question("q1", "singleSelect"),
            follow_up
        ])))
        .expect("definition is valid");

        assert_eq!(definition.title, "Job application");
        assert_eq!(definition.questions.len(), 2);
        assert!(!definition.questions[0].required);
        assert_eq!(definition.questions[0].options, json!({}));
        assert_eq!(
            definition.questions[1].conditional_rules,
            Some(ConditionalRuleSet::new(
                LogicOperator::Or,
                vec![Condition::new("q1", ConditionOperator::Equals, "Engineer")]
            ))
        );
    }

    #[test]
    fn missing_top_level_fields_are_rejected() {
        let mut req = request(json!([]));
        req.title = Some("   ".into());
        assert_eq!(
            validate_definition(&req),
            Err(DefinitionError::MissingRequiredFields)
        );

        let mut req = request(json!({ "not": "a list" }));
        req.title = Some("Title".into());
        assert_eq!(
            validate_definition(&req),
            Err(DefinitionError::MissingRequiredFields)
        );

        let req = FormDefinitionRequest::default();
        assert_eq!(
            validate_definition(&req).unwrap_err().to_string(),
            "Missing required fields"
        );
    }

    #[test]
    fn question_shape_is_checked() {
        let mut missing_label = question("q1", "singleLineText");
        missing_label["label"] = json!("");
        assert_eq!(
            validate_definition(&request(json!([missing_label]))),
            Err(DefinitionError::InvalidQuestion { index: 0 })
        );

        assert_eq!(
            validate_definition(&request(json!([question("q1", "singleLineText"), 7]))),
            Err(DefinitionError::InvalidQuestion { index: 1 })
        );
    }

    #[test]
    fn unsupported_type_names_the_type() {
        let err = validate_definition(&request(json!([question("q1", "rating")]))).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported question type: rating");
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = validate_definition(&request(json!([
            question("q1", "singleLineText"),
            question("q1", "longText")
        ])))
        .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateQuestionKey("q1".into()));
    }

    #[test]
    fn malformed_conditions_are_rejected() {
        let cases = [
            json!({ "conditions": [{ "operator": "equals", "value": "x" }] }),
            json!({ "conditions": [{ "questionKey": "q1", "value": "x" }] }),
            json!({ "conditions": [{ "questionKey": "q1", "operator": "matches", "value": "x" }] }),
            json!({ "conditions": [{ "questionKey": "q1", "operator": "equals" }] }),
            json!({ "conditions": [{ "questionKey": "q1", "operator": "equals", "value": null }] }),
            json!({ "conditions": "q1 == x" }),
            json!({ "logic": "XOR", "conditions": [] }),
            json!("always"),
        ];

        for rules in cases {
            let mut q = question("q2", "singleLineText");
            q["conditionalRules"] = rules.clone();
            let err = validate_definition(&request(json!([question("q1", "singleLineText"), q])))
                .expect_err("rules should be rejected");
            assert_eq!(
                err.to_string(),
                "Invalid conditional rule format",
                "rules: {rules}"
            );
        }
    }

    #[test]
    fn empty_rule_sets_are_kept_as_always_visible() {
        let mut q = question("q1", "singleLineText");
        q["conditionalRules"] = json!({ "logic": "AND", "conditions": [] });

        let definition = validate_definition(&request(json!([q]))).expect("valid");
        let rules = definition.questions[0].conditional_rules.as_ref();
        assert!(rules.is_some_and(|rules| rules.conditions.is_empty()));
        assert!(definition.questions[0].is_visible(&Default::default()));
    }
}
