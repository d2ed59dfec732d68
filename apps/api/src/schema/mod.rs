//! Schema Validator: validates documents against the named resume schemas.
//!
//! The full resume schema is embedded at compile time. Slice schemas are
//! projections of its top-level `properties` (sharing its `$defs`), so the
//! slices can never drift from the full schema. Everything is compiled once
//! and is read-only afterwards, which makes validation safe to call from any
//! number of concurrent jobs.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::{json, Map, Value};
use thiserror::Error;

const RESUME_SCHEMA: &str = include_str!("resume.schema.json");

/// Logical schema names understood by `validate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaName {
    FullResume,
    /// meta + summary + snapshot
    ProfileSlice,
    /// experience + projects
    ExperienceSlice,
    /// publications + certifications + extras
    PublicationsSlice,
}

impl SchemaName {
    pub const ALL: [SchemaName; 4] = [
        SchemaName::FullResume,
        SchemaName::ProfileSlice,
        SchemaName::ExperienceSlice,
        SchemaName::PublicationsSlice,
    ];

    /// Top-level keys covered by a slice. `None` for the full schema.
    pub fn slice_keys(&self) -> Option<&'static [&'static str]> {
        match self {
            SchemaName::FullResume => None,
            SchemaName::ProfileSlice => Some(&["meta", "summary", "snapshot"]),
            SchemaName::ExperienceSlice => Some(&["experience", "projects"]),
            SchemaName::PublicationsSlice => Some(&["publications", "certifications", "extras"]),
        }
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemaName::FullResume => "full resume",
            SchemaName::ProfileSlice => "profile slice",
            SchemaName::ExperienceSlice => "experience slice",
            SchemaName::PublicationsSlice => "publications slice",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    /// Every violation found, formatted as `<instance path>: <message>`.
    #[error("{schema} validation failed: {}", .violations.join("; "))]
    Violations {
        schema: String,
        violations: Vec<String>,
    },

    #[error("unknown resume property '{0}'")]
    UnknownProperty(String),

    #[error("schema could not be compiled: {0}")]
    Invalid(String),
}

impl SchemaError {
    /// The violation list, empty for non-validation errors.
    pub fn violations(&self) -> &[String] {
        match self {
            SchemaError::Violations { violations, .. } => violations,
            _ => &[],
        }
    }
}

struct SchemaRegistry {
    named: HashMap<SchemaName, Validator>,
    properties: HashMap<String, Validator>,
    /// Raw JSON of each slice, embedded into prompts.
    slice_sources: HashMap<SchemaName, Value>,
}

static REGISTRY: OnceLock<Result<SchemaRegistry, String>> = OnceLock::new();

fn registry() -> Result<&'static SchemaRegistry, SchemaError> {
    REGISTRY
        .get_or_init(build_registry)
        .as_ref()
        .map_err(|e| SchemaError::Invalid(e.clone()))
}

fn build_registry() -> Result<SchemaRegistry, String> {
    let full: Value = serde_json::from_str(RESUME_SCHEMA).map_err(|e| e.to_string())?;
    let defs = full.get("$defs").cloned().unwrap_or_else(|| json!({}));
    let dialect = full.get("$schema").cloned().unwrap_or(Value::Null);
    let properties = full
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut named = HashMap::new();
    let mut slice_sources = HashMap::new();
    for name in SchemaName::ALL {
        let source = match name.slice_keys() {
            None => full.clone(),
            Some(keys) => {
                let picked: Map<String, Value> = keys
                    .iter()
                    .filter_map(|k| properties.get(*k).map(|v| (k.to_string(), v.clone())))
                    .collect();
                json!({
                    "$schema": dialect,
                    "type": "object",
                    "properties": picked,
                    "$defs": defs,
                })
            }
        };
        let validator = jsonschema::validator_for(&source)
            .map_err(|e| format!("{name}: {e}"))?;
        named.insert(name, validator);
        slice_sources.insert(name, source);
    }

    let mut property_validators = HashMap::new();
    for (key, subschema) in &properties {
        let mut source = subschema.as_object().cloned().unwrap_or_default();
        source.insert("$schema".to_string(), dialect.clone());
        source.insert("$defs".to_string(), defs.clone());
        let validator = jsonschema::validator_for(&Value::Object(source))
            .map_err(|e| format!("property {key}: {e}"))?;
        property_validators.insert(key.clone(), validator);
    }

    Ok(SchemaRegistry {
        named,
        properties: property_validators,
        slice_sources,
    })
}

fn collect_violations(validator: &Validator, instance: &Value) -> Vec<String> {
    validator
        .iter_errors(instance)
        .map(|e| {
            let path = e.instance_path.to_string();
            let path = if path.is_empty() { "/".to_string() } else { path };
            format!("{path}: {e}")
        })
        .collect()
}

/// Validates `document` against the named schema, reporting every violation.
pub fn validate(document: &Value, name: SchemaName) -> Result<(), SchemaError> {
    let registry = registry()?;
    let validator = registry
        .named
        .get(&name)
        .ok_or_else(|| SchemaError::Invalid(format!("{name} not registered")))?;
    let violations = collect_violations(validator, document);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Violations {
            schema: name.to_string(),
            violations,
        })
    }
}

/// Validates one top-level resume field against its subschema.
pub fn validate_property(key: &str, value: &Value) -> Result<(), SchemaError> {
    let registry = registry()?;
    let validator = registry
        .properties
        .get(key)
        .ok_or_else(|| SchemaError::UnknownProperty(key.to_string()))?;
    let violations = collect_violations(validator, value);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Violations {
            schema: format!("property {key}"),
            violations,
        })
    }
}

/// Pretty-printed schema text for embedding into content-service prompts.
pub fn schema_text(name: SchemaName) -> String {
    registry()
        .ok()
        .and_then(|r| r.slice_sources.get(&name))
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::valid_resume_json;

    #[test]
    fn test_all_schemas_compile() {
        assert!(registry().is_ok());
        for name in SchemaName::ALL {
            assert!(!schema_text(name).is_empty(), "{name} has no source");
        }
    }

    #[test]
    fn test_valid_resume_passes_full_schema() {
        assert_eq!(validate(&valid_resume_json(), SchemaName::FullResume), Ok(()));
    }

    #[test]
    fn test_reports_every_violation_not_just_first() {
        let mut doc = valid_resume_json();
        doc["summary"] = json!("too short");
        doc["meta"]["name"] = json!("");
        doc["experience"] = json!([]);

        let err = validate(&doc, SchemaName::FullResume).unwrap_err();
        let violations = err.violations();
        assert!(violations.len() >= 3, "got {violations:?}");
        assert!(violations.iter().any(|v| v.starts_with("/summary")));
        assert!(violations.iter().any(|v| v.starts_with("/meta/name")));
        assert!(violations.iter().any(|v| v.starts_with("/experience")));
    }

    #[test]
    fn test_missing_required_field_reported_at_root() {
        let mut doc = valid_resume_json();
        doc.as_object_mut().unwrap().remove("snapshot");
        let err = validate(&doc, SchemaName::FullResume).unwrap_err();
        assert!(err.violations().iter().any(|v| v.contains("snapshot")));
    }

    #[test]
    fn test_contact_must_be_object() {
        let mut doc = valid_resume_json();
        doc["meta"]["contact"] = json!("me@example.com");
        assert!(validate(&doc, SchemaName::FullResume).is_err());
    }

    #[test]
    fn test_slices_only_check_their_own_keys() {
        // Slices carry no `required` list: an empty object is acceptable,
        // but a present key must still conform.
        assert!(validate(&json!({}), SchemaName::PublicationsSlice).is_ok());
        let short = json!({"publications": ["short"]});
        assert!(validate(&short, SchemaName::PublicationsSlice).is_err());
        let foreign = json!({"summary": "short", "publications": ["short"]});
        assert!(validate(&foreign, SchemaName::ExperienceSlice).is_ok());
    }

    #[test]
    fn test_validate_property_uses_subschema() {
        assert!(validate_property("certifications", &json!([{"name": "CKA"}])).is_ok());
        assert!(validate_property("certifications", &json!(["CKA"])).is_err());
        assert!(matches!(
            validate_property("hobbies", &json!([])),
            Err(SchemaError::UnknownProperty(_))
        ));
    }
}
