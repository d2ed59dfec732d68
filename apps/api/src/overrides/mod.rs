//! Override Normalizer: turns user-supplied override data of any shape into
//! typed `Overrides`.
//!
//! Normalization never fails. Every value is first decoded into a `Shape`, and
//! each field has one function per arm; unknown shapes degrade to their string
//! representation rather than rejecting the job.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Publications shorter than this are expanded before reaching the content service.
pub const MIN_PUBLICATION_LEN: usize = 40;
pub const MAX_PUBLICATION_LEN: usize = 400;
pub const MAX_EXTRA_TEXT_LEN: usize = 140;
pub const MAX_CERT_DESCRIPTION_LEN: usize = 210;

const NORMALIZED_KEYS: [&str; 3] = ["publications", "certifications", "extras"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Certification {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraItem {
    pub category: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub publications: Vec<String>,
    pub certifications: Vec<Certification>,
    pub extras: Vec<ExtraItem>,
    /// Unrecognized top-level keys, passed through verbatim.
    pub other: Map<String, Value>,
}

/// Decoded shape of an untrusted JSON value.
enum Shape<'a> {
    Text(&'a str),
    Object(&'a Map<String, Value>),
    List(&'a [Value]),
    Null,
    Other(&'a Value),
}

fn decode(value: &Value) -> Shape<'_> {
    match value {
        Value::String(s) => Shape::Text(s),
        Value::Object(o) => Shape::Object(o),
        Value::Array(a) => Shape::List(a),
        Value::Null => Shape::Null,
        other => Shape::Other(other),
    }
}

/// Items of a field: lists are iterated, any single value is a one-item list.
fn items(value: &Value) -> Vec<&Value> {
    match decode(value) {
        Shape::List(list) => list.iter().filter(|v| !v.is_null()).collect(),
        Shape::Null => Vec::new(),
        _ => vec![value],
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Truncates to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Truncates to at most `max` characters, backing up to the last space when
/// the cut would split a word.
pub fn truncate_words(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut = truncate_chars(s, max);
    match cut.rfind(' ') {
        Some(idx) if idx > 0 => cut[..idx].trim_end().to_string(),
        _ => cut,
    }
}

/// Expands a short publication with a deterministic suffix so it meets
/// `MIN_PUBLICATION_LEN`. No network call is involved.
pub fn format_publication(raw: &str) -> String {
    let s = raw.trim();
    if s.chars().count() >= MIN_PUBLICATION_LEN {
        let cut = truncate_words(s, MAX_PUBLICATION_LEN);
        if cut.chars().count() >= MIN_PUBLICATION_LEN {
            return cut;
        }
        // Backing up to a space near the start would drop below the minimum.
        return truncate_chars(s, MAX_PUBLICATION_LEN);
    }
    let year = chrono::Utc::now().year();
    let suffix =
        "A published article describing architecture, performance improvements, and key takeaways.";
    if s.is_empty() {
        format!("{year}. {suffix}")
    } else {
        format!("{s} — {year}. {suffix}")
    }
}

fn publication_from(value: &Value) -> String {
    match decode(value) {
        Shape::Text(s) => format_publication(s),
        Shape::Object(obj) => {
            let title = non_empty_str(obj, &["title", "name"]);
            let outline = non_empty_str(obj, &["outline", "summary", "description"]);
            match (title, outline) {
                (Some(t), Some(o)) => format_publication(&format!("{t} — {o}")),
                (Some(t), None) => format_publication(t),
                (None, Some(o)) => format_publication(o),
                (None, None) => format_publication(&stringify(value)),
            }
        }
        Shape::List(_) | Shape::Null | Shape::Other(_) => format_publication(&stringify(value)),
    }
}

fn certification_from(value: &Value) -> Certification {
    match decode(value) {
        Shape::Text(s) => Certification {
            name: s.trim().to_string(),
            ..Default::default()
        },
        Shape::Object(obj) => {
            let owned = |keys: &[&str]| non_empty_str(obj, keys).map(str::to_string);
            Certification {
                name: owned(&["name", "title"]).unwrap_or_else(|| stringify(value)),
                issuer: owned(&["issuer", "organization", "authority"]),
                date: owned(&["date", "issued_at", "issue_date", "issued"]),
                url: owned(&["url", "credential_url", "link"]),
                description: owned(&["description"])
                    .map(|d| truncate_words(&d, MAX_CERT_DESCRIPTION_LEN)),
            }
        }
        Shape::List(_) | Shape::Null | Shape::Other(_) => Certification {
            name: stringify(value),
            ..Default::default()
        },
    }
}

fn extra_from(value: &Value) -> Option<ExtraItem> {
    let (category, text) = match decode(value) {
        Shape::Text(s) => ("misc".to_string(), s.trim().to_string()),
        Shape::Object(obj) => (
            non_empty_str(obj, &["category"]).unwrap_or("misc").to_string(),
            non_empty_str(obj, &["text", "description", "title"])
                .unwrap_or_default()
                .to_string(),
        ),
        Shape::List(_) | Shape::Null | Shape::Other(_) => ("misc".to_string(), stringify(value)),
    };
    let text = truncate_chars(&text, MAX_EXTRA_TEXT_LEN);
    if text.trim().is_empty() {
        return None;
    }
    Some(ExtraItem { category, text })
}

impl Overrides {
    /// Normalizes an arbitrary override value. Never fails: non-object input
    /// produces empty overrides.
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };

        let mut out = Self::default();
        if let Some(p) = map.get("publications") {
            out.publications = items(p).into_iter().map(publication_from).collect();
        }
        if let Some(c) = map.get("certifications") {
            out.certifications = items(c)
                .into_iter()
                .map(certification_from)
                .filter(|c| !c.name.is_empty())
                .collect();
        }
        if let Some(e) = map.get("extras") {
            out.extras = items(e).into_iter().filter_map(extra_from).collect();
        }
        out.other = map
            .iter()
            .filter(|(k, _)| !NORMALIZED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out
    }

    pub fn publications_value(&self) -> Value {
        Value::Array(self.publications.iter().cloned().map(Value::String).collect())
    }

    pub fn certifications_value(&self) -> Value {
        serde_json::to_value(&self.certifications).unwrap_or(Value::Array(Vec::new()))
    }

    pub fn extras_value(&self) -> Value {
        serde_json::to_value(&self.extras).unwrap_or(Value::Array(Vec::new()))
    }

    /// Converts back into a JSON object for prompt payloads. Normalized lists
    /// are included only when non-empty; passthrough keys never shadow them.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut out = Map::new();
        if !self.publications.is_empty() {
            out.insert("publications".into(), self.publications_value());
        }
        if !self.certifications.is_empty() {
            out.insert("certifications".into(), self.certifications_value());
        }
        if !self.extras.is_empty() {
            out.insert("extras".into(), self.extras_value());
        }
        for (k, v) in &self.other {
            if !out.contains_key(k) {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}
