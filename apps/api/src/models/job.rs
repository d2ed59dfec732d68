use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::resume::ResumeDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    /// Hard validation gate or mandatory HTML artifact failed.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> JobStatus {
        match s {
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

/// Per-stage summary stored on the job for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub valid: bool,
    pub enriched: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

/// Job metadata. Known keys are typed; anything else round-trips through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_application_id: Option<String>,
    #[serde(default)]
    pub ai_warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stage_report: Vec<StageReport>,
    #[serde(default)]
    pub generated_html: String,
    #[serde(default)]
    pub generated_pdf: String,
    #[serde(default)]
    pub user_copy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_render_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub job_description: String,
    pub language: String,
    pub status: JobStatus,
    /// Raw user-supplied overrides, as submitted.
    #[serde(default)]
    pub overrides: Value,
    /// The validated resume, set once the hard gate passes.
    #[serde(default)]
    pub profile: Option<ResumeDocument>,
    #[serde(default)]
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(user_id: Uuid, language: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            job_description: String::new(),
            language: language.into(),
            status: JobStatus::Pending,
            overrides: Value::Null,
            profile: None,
            metadata: JobMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
