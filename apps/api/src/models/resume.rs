use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{self, SchemaError, SchemaName};

// ────────────────────────────────────────────────────────────────────────────
// Working document
// ────────────────────────────────────────────────────────────────────────────

/// Closed set of top-level resume fields. The working document is keyed by
/// this enum, so producer output with unknown keys can never leak into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeKey {
    Meta,
    Summary,
    Snapshot,
    Experience,
    Projects,
    Publications,
    Certifications,
    Extras,
    Labels,
}

impl ResumeKey {
    pub const ALL: [ResumeKey; 9] = [
        ResumeKey::Meta,
        ResumeKey::Summary,
        ResumeKey::Snapshot,
        ResumeKey::Experience,
        ResumeKey::Projects,
        ResumeKey::Publications,
        ResumeKey::Certifications,
        ResumeKey::Extras,
        ResumeKey::Labels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeKey::Meta => "meta",
            ResumeKey::Summary => "summary",
            ResumeKey::Snapshot => "snapshot",
            ResumeKey::Experience => "experience",
            ResumeKey::Projects => "projects",
            ResumeKey::Publications => "publications",
            ResumeKey::Certifications => "certifications",
            ResumeKey::Extras => "extras",
            ResumeKey::Labels => "labels",
        }
    }

    pub fn parse(key: &str) -> Option<ResumeKey> {
        ResumeKey::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl fmt::Display for ResumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The in-progress resume. Allowed to be partial or schema-violating until
/// it is converted into a `ResumeDocument` at the hard gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialResume {
    fields: BTreeMap<ResumeKey, Value>,
}

impl PartialResume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a working document from arbitrary JSON, keeping only known
    /// top-level keys. Non-object input yields an empty document.
    pub fn from_value(value: &Value) -> Self {
        let fields = value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| ResumeKey::parse(k).map(|key| (key, v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        Self { fields }
    }

    pub fn get(&self, key: ResumeKey) -> Option<&Value> {
        self.fields.get(&key)
    }

    pub fn get_mut(&mut self, key: ResumeKey) -> Option<&mut Value> {
        self.fields.get_mut(&key)
    }

    pub fn set(&mut self, key: ResumeKey, value: Value) {
        self.fields.insert(key, value);
    }

    pub fn is_set(&self, key: ResumeKey) -> bool {
        self.fields.contains_key(&key)
    }

    /// Mutable access to an object-valued field, replacing any non-object
    /// value with an empty object first.
    pub fn object_mut(&mut self, key: ResumeKey) -> &mut Map<String, Value> {
        let slot = self
            .fields
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("slot was just made an object"),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect(),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Strict output document
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub name: String,
    pub headline: String,
    pub contact: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub social_links: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tech: String,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub selected_projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub company: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub description: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extra {
    pub category: String,
    pub text: String,
}

/// The canonical output. Only ever produced by `ResumeDocument::from_partial`,
/// so every instance has passed the full-resume schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeDocument {
    pub meta: Meta,
    pub summary: String,
    pub snapshot: Snapshot,
    pub experience: Vec<Role>,
    pub projects: Vec<Project>,
    #[serde(default)]
    pub publications: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<CertificationEntry>,
    #[serde(default)]
    pub extras: Vec<Extra>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ResumeDocument {
    /// The hard gate: full-schema validation followed by typed decoding.
    pub fn from_partial(partial: &PartialResume) -> Result<Self, SchemaError> {
        let value = partial.to_value();
        schema::validate(&value, SchemaName::FullResume)?;
        serde_json::from_value(value).map_err(|e| SchemaError::Violations {
            schema: SchemaName::FullResume.to_string(),
            violations: vec![format!("/: {e}")],
        })
    }
}
