//! Shared fixtures and in-process stubs of the collaborator traits.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::aggregate::{AggregateError, AggregateResult, Aggregator};
use crate::cancel::Cancellation;
use crate::llm_client::prompts::Task;
use crate::llm_client::{CallContext, ContentError, ContentService};
use crate::models::resume::ResumeKey;
use crate::render::{RenderError, Renderer};

/// A complete resume that passes the full schema.
pub fn valid_resume_json() -> Value {
    json!({
        "meta": {
            "name": "Ada Lovelace",
            "headline": "Principal Platform Engineer",
            "contact": {"email": "ada@example.com", "location": "London"},
            "social_links": {"github": "https://github.com/ada"}
        },
        "summary": "Platform engineer with twelve years of experience building data-intensive systems, \
                    leading teams through migrations to Rust and Kubernetes, and mentoring engineers.",
        "snapshot": {
            "tech": "Rust, Go, PostgreSQL, Kubernetes, Kafka",
            "achievements": ["Cut p99 latency of the billing API by 60%"],
            "selected_projects": ["Atlas"]
        },
        "experience": [{
            "company": "Analytical Engines Ltd",
            "role": "Principal Engineer",
            "period": "2019 – Present",
            "location": "London",
            "bullets": [
                "Led the migration of the event pipeline from Python to Rust",
                "Designed the multi-region Postgres topology"
            ]
        }],
        "projects": [{
            "title": "Atlas",
            "stack": "Rust, Kafka",
            "description": "A streaming ingestion service processing two billion events per day."
        }],
        "publications": [
            "Scaling Event Processing at Nimbus Labs: lessons from three years of streaming"
        ],
        "certifications": [{"name": "Certified Kubernetes Administrator", "issuer": "CNCF", "date": "2023"}],
        "extras": [{"category": "misc", "text": "Open-source contributor"}]
    })
}

/// Aggregated source data for one user, rich enough for the deterministic
/// fallback to produce a gate-passing document on its own.
pub fn fixture_aggregate() -> AggregateResult {
    AggregateResult::from_value(json!({
        "profiles": [{
            "name": "Grace Hopper",
            "headline": "Staff Software Engineer",
            "email": "grace@example.com",
            "location": "Arlington, VA",
            "bio": "Compiler engineer who has spent two decades making programming languages \
                    approachable, from the first linkers to modern data tooling.",
            "skills": ["Rust", "PostgreSQL", "Kubernetes"],
            "social_links": {"linkedin": "https://linkedin.com/in/grace"}
        }],
        "experiences": [{
            "company": "Eckert-Mauchly Computer Corporation",
            "title": "Senior Engineer",
            "start_date": "2018-01-01",
            "end_date": null,
            "location": "Philadelphia",
            "description": "Led the compiler team. Shipped the first business-oriented toolchain."
        }],
        "projects": [{
            "title": "FLOW-MATIC",
            "description": "An English-like data processing language and its compiler.",
            "technologies": ["Assembly", "UNIVAC"]
        }],
        "publications": [{"title": "The Education of a Computer"}],
        "certifications": [{
            "name": "AWS Certified Solutions Architect",
            "issuer": "Amazon Web Services",
            "issued_at": "2022-05-10",
            "credential_url": "https://www.credly.com/badges/abc"
        }],
        "extras": [{"category": "speaking", "text": "Keynote at the Systems Conference"}]
    }))
}

type Scripted = Result<Value, ContentError>;

/// Content service stub. Each operation pops its next scripted response;
/// an empty script behaves like an unreachable service.
#[derive(Default)]
pub struct ScriptedContent {
    scripts: Mutex<HashMap<&'static str, VecDeque<Scripted>>>,
    labels: Mutex<Option<BTreeMap<String, String>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedContent {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, op: &'static str, response: Scripted) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(response);
        self
    }

    pub fn with_meta(self, r: Scripted) -> Self {
        self.push("meta", r)
    }

    pub fn with_experience(self, r: Scripted) -> Self {
        self.push("experience", r)
    }

    pub fn with_showcase(self, r: Scripted) -> Self {
        self.push("showcase", r)
    }

    pub fn with_synthesis(self, r: Scripted) -> Self {
        self.push("synthesis", r)
    }

    pub fn with_fields(self, r: Scripted) -> Self {
        self.push("fields", r)
    }

    pub fn with_full(self, r: Scripted) -> Self {
        self.push("full", r)
    }

    pub fn with_labels(self, labels: BTreeMap<String, String>) -> Self {
        *self.labels.lock().unwrap() = Some(labels);
        self
    }

    /// Names of the operations called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn last_payload(&self) -> Option<Value> {
        self.calls.lock().unwrap().last().map(|(_, p)| p.clone())
    }

    /// Payload of the first call with the given name.
    pub fn payload_for(&self, name: &str) -> Option<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
    }

    fn answer(&self, op: &'static str, task: Task<'_>, payload: &Value) -> Scripted {
        self.calls
            .lock()
            .unwrap()
            .push((task.to_string(), payload.clone()));
        self.scripts
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(ContentError::Exhausted {
                    attempts: 3,
                    last: "connection refused".to_string(),
                })
            })
    }
}

#[async_trait]
impl ContentService for ScriptedContent {
    async fn generate_meta(&self, payload: &Value, _: &CallContext) -> Result<Value, ContentError> {
        self.answer("meta", Task::Meta, payload)
    }

    async fn generate_experience(
        &self,
        payload: &Value,
        _: &CallContext,
    ) -> Result<Value, ContentError> {
        self.answer("experience", Task::Experience, payload)
    }

    async fn generate_showcase(
        &self,
        payload: &Value,
        _: &CallContext,
    ) -> Result<Value, ContentError> {
        self.answer("showcase", Task::Showcase, payload)
    }

    async fn generate_synthesis(
        &self,
        payload: &Value,
        _: &CallContext,
    ) -> Result<Value, ContentError> {
        self.answer("synthesis", Task::Synthesis, payload)
    }

    async fn enrich_fields(
        &self,
        payload: &Value,
        fields: &[ResumeKey],
        _: &CallContext,
    ) -> Result<Value, ContentError> {
        self.answer("fields", Task::Fields(fields), payload)
    }

    async fn enrich_full(&self, payload: &Value, _: &CallContext) -> Result<Value, ContentError> {
        self.answer("full", Task::Full, payload)
    }

    async fn format_labels(
        &self,
        defaults: &BTreeMap<String, String>,
        _: &CallContext,
    ) -> Result<BTreeMap<String, String>, ContentError> {
        self.calls
            .lock()
            .unwrap()
            .push((Task::Labels.to_string(), json!(defaults)));
        self.labels
            .lock()
            .unwrap()
            .clone()
            .ok_or(ContentError::Exhausted {
                attempts: 3,
                last: "connection refused".to_string(),
            })
    }
}

/// Aggregator stub returning a fixed result.
pub struct StubAggregator {
    pub result: Option<AggregateResult>,
    pub job_application: Option<Value>,
}

impl StubAggregator {
    pub fn with(result: AggregateResult) -> Self {
        Self {
            result: Some(result),
            job_application: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            job_application: None,
        }
    }
}

#[async_trait]
impl Aggregator for StubAggregator {
    async fn aggregate(&self, _: Uuid) -> Result<AggregateResult, AggregateError> {
        self.result
            .clone()
            .ok_or_else(|| AggregateError::Unavailable("stub".to_string()))
    }

    async fn job_application(&self, _: &str) -> Result<Option<Value>, AggregateError> {
        Ok(self.job_application.clone())
    }
}

/// Renderer stub: fails the first `fail_first` calls, then returns `payload`.
pub struct StubRenderer {
    fail_first: u32,
    payload: &'static [u8],
    calls: AtomicU32,
}

impl StubRenderer {
    pub fn succeeding() -> Self {
        Self::failing_then(0)
    }

    pub fn failing_then(fail_first: u32) -> Self {
        Self {
            fail_first,
            payload: b"%PDF-1.7\n%stub\n",
            calls: AtomicU32::new(0),
        }
    }

    /// Always "succeeds" with bytes that are not a PDF.
    pub fn garbage() -> Self {
        Self {
            fail_first: 0,
            payload: b"<html>not a pdf</html>",
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for StubRenderer {
    async fn render_html_to_pdf(&self, _: &str, _: &Cancellation) -> Result<Bytes, RenderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(RenderError::Failed {
                status: "exit status: 1".to_string(),
                stderr: format!("stub failure {}", n + 1),
            });
        }
        Ok(Bytes::from_static(self.payload))
    }
}
