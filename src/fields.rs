//! Built-in field sets and the editable list of user fields.

use crate::error::{Error, Result};
use crate::types::{FieldDefinition, FieldType};
use regex::Regex;
use std::sync::OnceLock;

/// Fields extracted from every bill regardless of configuration: (name, description, type).
const MANDATORY_FIELDS: &[(&str, &str, FieldType)] = &[
    ("start date", "Start date of reporting period", FieldType::String),
    ("end date", "End date of reporting period", FieldType::String),
    ("total", "Total volume", FieldType::Number),
];

/// Waste stream fields used until the user saves a configuration of their own.
const DEFAULT_STREAM_FIELDS: &[(&str, &str, FieldType)] = &[
    ("recycle", "Total volume of all recycling streams", FieldType::Number),
    ("compost", "Total volume of all compost streams", FieldType::Number),
    ("trash", "Total volume of all trash streams", FieldType::Number),
];

fn to_definitions(table: &[(&str, &str, FieldType)]) -> Vec<FieldDefinition> {
    table
        .iter()
        .map(|(name, desc, t)| FieldDefinition::new(*name, *desc, *t))
        .collect()
}

pub fn mandatory_fields() -> Vec<FieldDefinition> {
    to_definitions(MANDATORY_FIELDS)
}

pub fn default_user_fields() -> Vec<FieldDefinition> {
    to_definitions(DEFAULT_STREAM_FIELDS)
}

pub fn is_mandatory(name: &str) -> bool {
    MANDATORY_FIELDS.iter().any(|(n, _, _)| *n == name)
}

/// The user-defined part of a field configuration, edited by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldList {
    fields: Vec<FieldDefinition>,
}

impl FieldList {
    pub fn new(fields: Vec<FieldDefinition>) -> Self {
        Self { fields }
    }

    pub fn as_slice(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn into_vec(self) -> Vec<FieldDefinition> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Mandatory fields followed by this list, the order sent to the extractor and exported.
    pub fn with_mandatory(&self) -> Vec<FieldDefinition> {
        let mut all = mandatory_fields();
        all.extend(self.fields.iter().cloned());
        all
    }

    /// Appends a field. Both name and description must be non-blank.
    pub fn add(&mut self, field: FieldDefinition) -> Result<()> {
        if field.name.trim().is_empty() || field.description.trim().is_empty() {
            return Err(Error::validation("Field name and description are required."));
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn update(&mut self, index: usize, field: FieldDefinition) -> Result<()> {
        let slot = self
            .fields
            .get_mut(index)
            .ok_or_else(|| Error::validation(format!("No field at index {}.", index)))?;
        *slot = field;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<FieldDefinition> {
        if index >= self.fields.len() {
            return Err(Error::validation(format!("No field at index {}.", index)));
        }
        Ok(self.fields.remove(index))
    }

    /// Inserts a copy right after `index` under a derived name not yet in use. Returns the new index.
    pub fn duplicate(&mut self, index: usize) -> Result<usize> {
        let source = self
            .fields
            .get(index)
            .cloned()
            .ok_or_else(|| Error::validation(format!("No field at index {}.", index)))?;
        let name = self.derive_copy_name(&source.name);
        self.fields.insert(
            index + 1,
            FieldDefinition {
                name,
                ..source
            },
        );
        Ok(index + 1)
    }

    fn derive_copy_name(&self, name: &str) -> String {
        static COPY_SUFFIX: OnceLock<Regex> = OnceLock::new();
        let re = COPY_SUFFIX.get_or_init(|| Regex::new(r"^(.*) \(copy(?: \d+)?\)$").expect("copy suffix regex"));
        let base = re
            .captures(name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(name);

        let taken = |candidate: &str| self.fields.iter().any(|f| f.name == candidate);
        let mut candidate = format!("{} (copy)", base);
        let mut n = 2u32;
        while taken(&candidate) {
            candidate = format!("{} (copy {})", base, n);
            n += 1;
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> FieldList {
        FieldList::new(default_user_fields())
    }

    #[test]
    fn mandatory_fields_lead_the_merged_list() {
        let all = list().with_mandatory();
        let names: Vec<&str> = all.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["start date", "end date", "total", "recycle", "compost", "trash"]);
        assert!(is_mandatory("total"));
        assert!(!is_mandatory("recycle"));
    }

    #[test]
    fn add_requires_name_and_description() {
        let mut l = list();
        assert!(l.add(FieldDefinition::new("hauler", "", FieldType::String)).is_err());
        assert!(l.add(FieldDefinition::new(" ", "Who hauls", FieldType::String)).is_err());
        l.add(FieldDefinition::new("hauler", "Who hauls", FieldType::String)).unwrap();
        assert_eq!(l.len(), 4);
        assert_eq!(l.as_slice()[3].name, "hauler");
    }

    #[test]
    fn update_and_remove_by_index() {
        let mut l = list();
        l.update(0, FieldDefinition::new("recycling", "Recycling volume", FieldType::Number))
            .unwrap();
        assert_eq!(l.as_slice()[0].name, "recycling");
        let removed = l.remove(1).unwrap();
        assert_eq!(removed.name, "compost");
        assert_eq!(l.len(), 2);
        assert!(l.remove(5).is_err());
        assert!(l.update(9, FieldDefinition::new("x", "y", FieldType::String)).is_err());
    }

    #[test]
    fn duplicate_derives_unique_names() {
        let mut l = list();
        assert_eq!(l.duplicate(0).unwrap(), 1);
        assert_eq!(l.as_slice()[1].name, "recycle (copy)");
        assert_eq!(l.as_slice()[1].description, l.as_slice()[0].description);

        l.duplicate(0).unwrap();
        assert_eq!(l.as_slice()[1].name, "recycle (copy 2)");

        // duplicating a copy strips the suffix before deriving
        let idx = l.duplicate(1).unwrap();
        assert_eq!(l.as_slice()[idx].name, "recycle (copy 3)");
        assert!(l.duplicate(42).is_err());
    }
}
