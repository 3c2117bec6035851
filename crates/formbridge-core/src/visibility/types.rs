use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// Answers collected so far, keyed by question key.
pub type Answers = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum LogicOperator {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    /// Missing or unknown operator in stored data. Never matches.
    #[default]
    #[serde(other)]
    Unrecognized,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Equals => "equals",
            ConditionOperator::NotEquals => "notEquals",
            ConditionOperator::Contains => "contains",
            ConditionOperator::Unrecognized => "unrecognized",
        }
    }
}

/// A single comparison between an earlier answer and a literal value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Condition {
    #[serde(default, deserialize_with = "lenient_question_key")]
    pub question_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_operator")]
    pub operator: ConditionOperator,
    /// `None` when stored data has no `value` key. A literal `null` stays `Some`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    #[ts(optional)]
    pub value: Option<Value>,
}

impl Condition {
    pub fn new(
        question_key: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            question_key: Some(question_key.into()),
            operator,
            value: Some(value.into()),
        }
    }

    /// Parse one stored condition. Anything that is not an object becomes a
    /// condition that can never match.
    pub fn from_stored(value: Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            _ => Self::default(),
        }
    }
}

/// The flat AND/OR list of conditions gating a question's visibility.
///
/// Deserialization never fails on drifted stored data: a `conditions` value that
/// is not a list is read as empty, and malformed entries are kept as conditions
/// that never match so that an `AND` set stays closed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ConditionalRuleSet {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_logic"
    )]
    pub logic: Option<LogicOperator>,
    #[serde(default, deserialize_with = "lenient_conditions")]
    pub conditions: Vec<Condition>,
}

impl ConditionalRuleSet {
    pub fn new(logic: LogicOperator, conditions: Vec<Condition>) -> Self {
        Self {
            logic: Some(logic),
            conditions,
        }
    }

    pub fn logic(&self) -> LogicOperator {
        self.logic.unwrap_or_default()
    }

    /// Read a rule set from stored JSON. Non-object values mean "no rules".
    pub fn from_stored(value: Value) -> Option<Self> {
        match value {
            Value::Object(_) => serde_json::from_value(value).ok(),
            _ => None,
        }
    }
}

/// Deserializer for `Option<ConditionalRuleSet>` fields holding stored form data.
pub fn lenient_rules<'de, D>(deserializer: D) -> Result<Option<ConditionalRuleSet>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(ConditionalRuleSet::from_stored(value))
}

fn lenient_logic<'de, D>(deserializer: D) -> Result<Option<LogicOperator>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value.as_str() {
        Some("OR") => Some(LogicOperator::Or),
        Some("AND") => Some(LogicOperator::And),
        _ => None,
    })
}

fn lenient_conditions<'de, D>(deserializer: D) -> Result<Vec<Condition>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.into_iter().map(Condition::from_stored).collect(),
        _ => Vec::new(),
    })
}

fn lenient_operator<'de, D>(deserializer: D) -> Result<ConditionOperator, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn lenient_question_key<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(key) => Some(key),
        Value::Number(key) => Some(key.to_string()),
        _ => None,
    })
}
