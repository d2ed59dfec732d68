//! The four fixed synthesis stages and their validators.
//!
//! Validators are pure functions over the working document. Each owned key is
//! checked for shape first (the stage's own rules) and then against its
//! schema subschema, so a stage is only valid when its slice would also pass
//! the full-resume gate.

use std::fmt;

use serde_json::{Map, Value};

use crate::models::resume::{PartialResume, ResumeKey};
use crate::schema;

pub const SUMMARY_MIN_CHARS: usize = 80;
pub const SUMMARY_MAX_CHARS: usize = 330;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Foundation,
    ProfessionalHistory,
    Showcase,
    Synthesis,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Foundation,
        Stage::ProfessionalHistory,
        Stage::Showcase,
        Stage::Synthesis,
    ];

    pub fn number(&self) -> u8 {
        match self {
            Stage::Foundation => 1,
            Stage::ProfessionalHistory => 2,
            Stage::Showcase => 3,
            Stage::Synthesis => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Foundation => "foundation",
            Stage::ProfessionalHistory => "professional_history",
            Stage::Showcase => "showcase",
            Stage::Synthesis => "synthesis",
        }
    }

    /// Keys this stage validates and is responsible for producing.
    pub fn owned_keys(&self) -> &'static [ResumeKey] {
        match self {
            Stage::Foundation => &[ResumeKey::Meta, ResumeKey::Snapshot],
            Stage::ProfessionalHistory => &[ResumeKey::Experience],
            Stage::Showcase => &[
                ResumeKey::Projects,
                ResumeKey::Publications,
                ResumeKey::Certifications,
            ],
            Stage::Synthesis => &[ResumeKey::Summary, ResumeKey::Extras],
        }
    }

    /// Keys this stage may write. Synthesis additionally polishes `meta`,
    /// restricted to blank non-identity fields.
    pub fn merge_keys(&self) -> &'static [ResumeKey] {
        match self {
            Stage::Synthesis => &[ResumeKey::Summary, ResumeKey::Extras, ResumeKey::Meta],
            other => other.owned_keys(),
        }
    }

    /// Meta fields this stage must never write.
    pub fn protected_meta_fields(&self) -> &'static [&'static str] {
        match self {
            Stage::Synthesis => &["name", "headline"],
            _ => &[],
        }
    }

    /// Runs this stage's validator against the current document.
    pub fn validate(&self, doc: &PartialResume) -> StageValidationResult {
        let mut missing = Vec::new();
        let mut errors = Vec::new();
        let mut partial = Map::new();

        for &key in self.owned_keys() {
            let report = check_key(key, doc.get(key));
            missing.extend(report.missing);
            errors.extend(report.error);
            if let Some(value) = doc.get(key) {
                partial.insert(key.as_str().to_string(), value.clone());
            }
        }

        StageValidationResult {
            valid: missing.is_empty(),
            missing,
            partial: Value::Object(partial),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.name())
    }
}

/// Result of one validator run. Never mutated after construction; re-run the
/// validator to observe a new state.
#[derive(Debug, Clone, PartialEq)]
pub struct StageValidationResult {
    pub valid: bool,
    /// Field paths that are absent or unacceptable, e.g. `experience[0].bullets`.
    pub missing: Vec<String>,
    /// The stage's owned keys as currently present in the document.
    pub partial: Value,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct KeyReport {
    missing: Vec<String>,
    error: Option<String>,
}

impl KeyReport {
    fn miss(&mut self, path: impl Into<String>) {
        self.missing.push(path.into());
    }
}

fn non_empty_str(obj: &Map<String, Value>, field: &str) -> bool {
    obj.get(field)
        .and_then(Value::as_str)
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false)
}

fn non_empty_array(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false)
}

/// Whether a single value for `key` is acceptable: shape rules, then schema.
pub fn key_is_valid(key: ResumeKey, value: Option<&Value>) -> bool {
    check_key(key, value).missing.is_empty()
}

fn check_key(key: ResumeKey, value: Option<&Value>) -> KeyReport {
    let mut report = KeyReport::default();
    let name = key.as_str();
    let Some(value) = value else {
        report.miss(name);
        return report;
    };

    match key {
        ResumeKey::Meta => match value.as_object() {
            None => {
                report.miss(name);
                report.error = Some("meta is not an object".to_string());
            }
            Some(meta) => {
                if !non_empty_str(meta, "name") {
                    report.miss("meta.name");
                }
                if !non_empty_str(meta, "headline") {
                    report.miss("meta.headline");
                }
                let contact_ok = meta
                    .get("contact")
                    .and_then(Value::as_object)
                    .map(|c| !c.is_empty())
                    .unwrap_or(false);
                if !contact_ok {
                    report.miss("meta.contact");
                }
            }
        },
        ResumeKey::Snapshot => match value.as_object() {
            None => {
                report.miss(name);
                report.error = Some("snapshot is not an object".to_string());
            }
            Some(snapshot) => {
                if !non_empty_str(snapshot, "tech") {
                    report.miss("snapshot.tech");
                }
            }
        },
        ResumeKey::Experience => match value.as_array().filter(|a| !a.is_empty()) {
            None => {
                report.miss("experience (empty or invalid)");
                report.error = Some("experience is not a non-empty array".to_string());
            }
            Some(roles) => {
                for (i, role) in roles.iter().enumerate() {
                    let Some(role) = role.as_object() else {
                        report.miss(format!("experience[{i}] invalid type"));
                        continue;
                    };
                    if !non_empty_str(role, "role") {
                        report.miss(format!("experience[{i}].role"));
                    }
                    if !non_empty_str(role, "company") {
                        report.miss(format!("experience[{i}].company"));
                    }
                    if !non_empty_array(role.get("bullets")) {
                        report.miss(format!("experience[{i}].bullets"));
                    }
                }
            }
        },
        ResumeKey::Projects
        | ResumeKey::Publications
        | ResumeKey::Certifications
        | ResumeKey::Extras => {
            if !non_empty_array(Some(value)) {
                report.miss(format!("{name} (empty or invalid)"));
            }
        }
        ResumeKey::Summary => {
            let len = value.as_str().map(|s| s.chars().count()).unwrap_or(0);
            if !(SUMMARY_MIN_CHARS..=SUMMARY_MAX_CHARS).contains(&len) {
                report.miss(format!("summary (invalid length: {len})"));
            }
        }
        ResumeKey::Labels => {}
    }

    // Shape first; schema detail only once the shape is right, so paths
    // don't get reported twice.
    if report.missing.is_empty() {
        if let Err(e) = schema::validate_property(name, value) {
            for violation in e.violations() {
                report.miss(format!("{name}{violation}"));
            }
            if e.violations().is_empty() {
                report.miss(format!("{name}: {e}"));
            }
        }
    }
    report
}
