use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::forms::QuestionType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WhoAmI {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Base {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub permission_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Table {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub primary_field_id: Option<String>,
    #[serde(default)]
    pub fields: Vec<TableField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TableField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "Record<string, unknown> | null")]
    pub options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableField {
    /// Choice names for select fields, or `None` when the field carries no choice list.
    ///
    /// Choices are normally `{ id, name, color }` objects; bare strings are accepted too.
    pub fn choice_names(&self) -> Option<Vec<String>> {
        let choices = self.options.as_ref()?.get("choices")?.as_array()?;
        Some(
            choices
                .iter()
                .filter_map(|choice| match choice {
                    Value::String(name) => Some(name.clone()),
                    other => other
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect(),
        )
    }

    pub fn mapped_type(&self) -> Option<QuestionType> {
        map_field_type(&self.field_type)
    }
}

/// A table field that can back a form question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SupportedField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mapped_type: QuestionType,
    #[ts(type = "Record<string, unknown>")]
    pub options: Value,
}

impl SupportedField {
    pub fn from_table_field(field: &TableField) -> Option<Self> {
        Some(Self {
            id: field.id.clone(),
            name: field.name.clone(),
            field_type: field.field_type.clone(),
            mapped_type: field.mapped_type()?,
            options: field
                .options
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new())),
        })
    }
}

pub fn supported_fields(fields: &[TableField]) -> Vec<SupportedField> {
    fields
        .iter()
        .filter_map(SupportedField::from_table_field)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirtableRecord {
    pub id: String,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListBasesResponse {
    #[serde(default)]
    pub bases: Vec<Base>,
    #[serde(default)]
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListTablesResponse {
    #[serde(default)]
    pub tables: Vec<Table>,
}

pub fn map_field_type(airtable_type: &str) -> Option<QuestionType> {
    match airtable_type {
        "singleLineText" => Some(QuestionType::SingleLineText),
        "multilineText" => Some(QuestionType::LongText),
        "singleSelect" => Some(QuestionType::SingleSelect),
        "multipleSelects" | "multipleRecordLinks" => Some(QuestionType::MultipleSelects),
        "multipleAttachments" | "attachment" => Some(QuestionType::Attachments),
        _ => None,
    }
}

pub fn is_supported_field_type(airtable_type: &str) -> bool {
    map_field_type(airtable_type).is_some()
}
