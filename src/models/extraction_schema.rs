use crate::types::{FieldDefinition, FieldType};
use serde::{Deserialize, Serialize};

/// JSON-schema-like request body telling the extract endpoint which fields to return.
///
/// Field types map onto the wire as `"number"` for number fields and
/// `"string"` for everything else. Boolean fields go out as `"string"`:
/// the extract service and existing consumers of exported data have only
/// ever seen that shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Field name -> `{type, description}`. Insertion ordered.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Every requested field name, in request order.
    pub required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub property_type: String,
    pub description: String,
}

fn wire_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Number => "number",
        FieldType::String | FieldType::Boolean => "string",
    }
}

impl ExtractionSchema {
    /// Build from an ordered field list. Names should be unique; when one
    /// repeats, the later definition wins in `properties` (keeping the
    /// first position) and `required` lists the name every time it occurs.
    pub fn build(fields: &[FieldDefinition]) -> Self {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::with_capacity(fields.len());
        for field in fields {
            let prop = serde_json::json!({
                "type": wire_type(field.field_type),
                "description": field.description,
            });
            properties.insert(field.name.clone(), prop);
            required.push(field.name.clone());
        }
        Self {
            schema_type: "object".to_string(),
            properties,
            required,
        }
    }

    /// Mandatory fields first, then user fields.
    pub fn merged(mandatory: &[FieldDefinition], user: &[FieldDefinition]) -> Self {
        let all: Vec<FieldDefinition> = mandatory.iter().chain(user).cloned().collect();
        Self::build(&all)
    }

    pub fn property(&self, name: &str) -> Option<PropertySchema> {
        self.properties
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(name: &str, t: FieldType) -> FieldDefinition {
        FieldDefinition::new(name, format!("{} description", name), t)
    }

    #[test]
    fn required_is_mandatory_then_user() {
        let m = vec![f("start date", FieldType::String), f("total", FieldType::Number)];
        let u = vec![f("recycle", FieldType::Number), f("hauler", FieldType::String)];
        let schema = ExtractionSchema::merged(&m, &u);
        assert_eq!(schema.required, vec!["start date", "total", "recycle", "hauler"]);
        assert_eq!(schema.properties.len(), 4);
        assert_eq!(schema.schema_type, "object");
    }

    #[test]
    fn number_stays_number_and_boolean_becomes_string() {
        let schema = ExtractionSchema::build(&[
            f("total", FieldType::Number),
            f("paid", FieldType::Boolean),
            f("vendor", FieldType::String),
        ]);
        assert_eq!(schema.property("total").unwrap().property_type, "number");
        assert_eq!(schema.property("paid").unwrap().property_type, "string");
        assert_eq!(schema.property("vendor").unwrap().property_type, "string");
        assert_eq!(schema.property("vendor").unwrap().description, "vendor description");
    }

    #[test]
    fn duplicate_name_last_write_wins() {
        let first = FieldDefinition::new("total", "first", FieldType::String);
        let other = f("vendor", FieldType::String);
        let second = FieldDefinition::new("total", "second", FieldType::Number);
        let schema = ExtractionSchema::build(&[first, other, second]);

        assert_eq!(schema.properties.len(), 2);
        let keys: Vec<&String> = schema.properties.keys().collect();
        assert_eq!(keys, vec!["total", "vendor"]);
        let total = schema.property("total").unwrap();
        assert_eq!(total.description, "second");
        assert_eq!(total.property_type, "number");
        assert_eq!(schema.required, vec!["total", "vendor", "total"]);
    }

    #[test]
    fn build_leaves_input_untouched() {
        let fields = vec![f("paid", FieldType::Boolean)];
        let before = fields.clone();
        let _ = ExtractionSchema::build(&fields);
        assert_eq!(fields, before);
    }

    #[test]
    fn serializes_to_wire_shape() {
        let schema = ExtractionSchema::build(&[f("total", FieldType::Number)]);
        let v: serde_json::Value = serde_json::from_str(&schema.to_json_string().unwrap()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "type": "object",
                "properties": {"total": {"type": "number", "description": "total description"}},
                "required": ["total"],
            })
        );
    }

    #[test]
    fn empty_field_list_gives_empty_schema() {
        let schema = ExtractionSchema::build(&[]);
        assert!(schema.properties.is_empty());
        assert!(schema.required.is_empty());
    }
}
