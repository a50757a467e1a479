use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Extracted values keyed by field name, in the order the service returned them.
pub type FieldValues = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Boolean,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
        })
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(FieldType::String),
            "number" => Ok(FieldType::Number),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            other => Err(format!("Unknown field type: {}", other)),
        }
    }
}

/// One field the user wants pulled out of every document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Display label and schema key.
    pub name: String,
    /// Free text guiding the extraction model.
    pub description: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field_type,
        }
    }
}

/// Parses the CLI form `name:type:description`. Type defaults to string and
/// the description to the name.
impl FromStr for FieldDefinition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let name = parts.next().unwrap_or("").trim();
        if name.is_empty() {
            return Err("Field name is required.".to_string());
        }
        let field_type = match parts.next().map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.parse()?,
            None => FieldType::String,
        };
        let description = parts
            .next()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(name)
            .to_string();
        Ok(FieldDefinition::new(name, description, field_type))
    }
}

/// A named, timestamped set of fields persisted between sessions.
/// Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfiguration {
    pub id: i64,
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
}
