use std::borrow::Cow;

use serde_json::Value;

use super::types::{Answers, Condition, ConditionOperator, ConditionalRuleSet, LogicOperator};

/// Decide whether a question gated by `rules` is visible given the answers so far.
///
/// Absent rules and empty condition lists are always visible. A condition whose
/// referenced answer is missing, null or an empty string never matches, whatever
/// its operator. That includes `notEquals`.
pub fn should_show_question(rules: Option<&ConditionalRuleSet>, answers: &Answers) -> bool {
    let Some(rules) = rules else {
        return true;
    };
    if rules.conditions.is_empty() {
        return true;
    }

    let mut results = rules
        .conditions
        .iter()
        .map(|condition| evaluate_condition(condition, answers));

    match rules.logic() {
        LogicOperator::Or => results.any(|matched| matched),
        LogicOperator::And => results.all(|matched| matched),
    }
}

impl ConditionalRuleSet {
    pub fn is_satisfied_by(&self, answers: &Answers) -> bool {
        should_show_question(Some(self), answers)
    }
}

pub fn evaluate_condition(condition: &Condition, answers: &Answers) -> bool {
    let Some(answer) = condition
        .question_key
        .as_deref()
        .and_then(|key| answers.get(key))
        .filter(|answer| is_present(answer))
    else {
        return false;
    };
    let Some(value) = &condition.value else {
        return false;
    };

    let expected = string_form(value);
    match condition.operator {
        ConditionOperator::Equals => string_form(answer) == expected,
        ConditionOperator::NotEquals => string_form(answer) != expected,
        ConditionOperator::Contains => match answer {
            Value::Array(items) => items
                .iter()
                .any(|item| string_form(item).contains(expected.as_ref())),
            other => string_form(other).contains(expected.as_ref()),
        },
        ConditionOperator::Unrecognized => false,
    }
}

/// Null and the empty string count as "not answered". Empty lists do not.
pub fn is_present(answer: &Value) -> bool {
    match answer {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Canonical string form used by every comparison.
pub fn string_form(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed("null"),
        Value::Bool(true) => Cow::Borrowed("true"),
        Value::Bool(false) => Cow::Borrowed("false"),
        Value::Number(number) => Cow::Owned(number_form(number)),
        Value::Array(items) => Cow::Owned(
            items
                .iter()
                .map(|item| match item {
                    Value::Null => Cow::Borrowed(""),
                    other => string_form(other),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Cow::Borrowed("[object Object]"),
    }
}

/// Decimal notation between 1e-6 and 1e21, exponent notation (`1e+21`, `1.5e-7`)
/// outside it.
fn number_form(number: &serde_json::Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    let Some(f) = number.as_f64() else {
        return number.to_string();
    };
    if f == 0.0 {
        return "0".to_string();
    }
    if (1e-6..1e21).contains(&f.abs()) {
        return f.to_string();
    }

    let exponent_form = format!("{f:e}");
    match exponent_form.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{mantissa}e+{exponent}")
        }
        _ => exponent_form,
    }
}
