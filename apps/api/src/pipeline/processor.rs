//! One job from aggregated data to validated resume, HTML and PDF.
//!
//! Every external call is best effort except where noted: aggregation
//! degrades to empty data, content calls degrade to the deterministic
//! fallback, and a failed PDF render leaves the HTML in place. Fatal are
//! cancellation, the final validation gate, template errors, and failing to
//! write the HTML artifact.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::{AggregateResult, Aggregator};
use crate::cancel::Cancellation;
use crate::llm_client::{CallContext, ContentError, ContentService};
use crate::models::job::{Job, JobStatus, StageReport};
use crate::models::resume::{PartialResume, ResumeDocument, ResumeKey};
use crate::overrides::Overrides;
use crate::pipeline::artifacts::{render_with_retry, ArtifactStore};
use crate::pipeline::backfill;
use crate::pipeline::enrich::{self, StageInputs};
use crate::pipeline::stages::Stage;
use crate::render::html::{default_labels, HtmlTemplater};
use crate::render::{RenderError, Renderer};
use crate::repository::{JobsRepo, RepoError};
use crate::retry::{Cancelled, RetryPolicy};
use crate::schema::SchemaError;

const REFINED_KEYS: [ResumeKey; 3] = [
    ResumeKey::Publications,
    ResumeKey::Certifications,
    ResumeKey::Extras,
];

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("resume failed validation: {0}")]
    Validation(#[from] SchemaError),

    #[error("failed to write artifact: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("failed to render HTML: {0}")]
    Template(RenderError),

    #[error("job cancelled")]
    Cancelled,

    #[error("failed to persist job: {0}")]
    Repo(#[from] RepoError),
}

impl From<Cancelled> for ProcessError {
    fn from(_: Cancelled) -> Self {
        ProcessError::Cancelled
    }
}

fn ensure_live(cancel: &Cancellation) -> Result<(), ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }
    Ok(())
}

pub struct Processor {
    content: Arc<dyn ContentService>,
    aggregator: Arc<dyn Aggregator>,
    repo: Arc<dyn JobsRepo>,
    renderer: Arc<dyn Renderer>,
    templater: HtmlTemplater,
    artifacts: ArtifactStore,
    render_retry: RetryPolicy,
}

impl Processor {
    pub fn new(
        content: Arc<dyn ContentService>,
        aggregator: Arc<dyn Aggregator>,
        repo: Arc<dyn JobsRepo>,
        renderer: Arc<dyn Renderer>,
        artifacts: ArtifactStore,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            content,
            aggregator,
            repo,
            renderer,
            templater: HtmlTemplater::new()?,
            artifacts,
            render_retry: RetryPolicy::default(),
        })
    }

    pub fn with_render_retry(mut self, policy: RetryPolicy) -> Self {
        self.render_retry = policy;
        self
    }

    pub fn repo(&self) -> &Arc<dyn JobsRepo> {
        &self.repo
    }

    /// Runs the whole pipeline and saves the completed job. On error the job
    /// is left for the caller to mark failed.
    #[instrument(skip_all, fields(job_id = %job.id, user_id = %job.user_id))]
    pub async fn process(&self, job: &mut Job, cancel: &Cancellation) -> Result<(), ProcessError> {
        ensure_live(cancel)?;
        let ctx = CallContext::new(job.language.clone(), cancel.clone());

        let aggregated = self.aggregate(job, cancel).await?;
        let overrides = Overrides::from_value(&job.overrides);
        let mut payload = json!({
            "aggregated": aggregated.to_value(),
            "overrides": overrides.to_map(),
        });
        if !job.job_description.trim().is_empty() {
            payload["job_description"] = json!(job.job_description);
        }

        let mut doc = PartialResume::new();
        backfill::seed_from_overrides(&mut doc, &overrides);

        let inputs = StageInputs {
            payload: &payload,
            overrides: &overrides,
            service: self.content.as_ref(),
            ctx: &ctx,
        };
        let mut enriched = BTreeMap::new();
        for stage in Stage::ALL {
            ensure_live(cancel)?;
            let outcome = enrich::run_stage(stage, &mut doc, &inputs).await?;
            if !outcome.after.valid {
                job.metadata
                    .ai_warnings
                    .push(format!("{stage}: missing {}", outcome.after.missing.join(", ")));
            }
            enriched.insert(stage.number(), outcome.enriched);
        }

        backfill::backfill_meta(&mut doc, &aggregated);
        backfill::backfill_showcase(&mut doc, &aggregated);
        job.metadata.stage_report = Stage::ALL
            .into_iter()
            .map(|stage| {
                backfill::fallback_stage(stage, &mut doc, &aggregated, &overrides);
                let result = stage.validate(&doc);
                StageReport {
                    stage: stage.name().to_string(),
                    valid: result.valid,
                    enriched: enriched.get(&stage.number()).copied().unwrap_or(false),
                    missing: result.missing,
                }
            })
            .collect();

        let base = doc.clone();
        if !overrides.publications.is_empty() {
            self.refine_overrides(&mut doc, &overrides, &ctx).await?;
        }

        let labels = self.labels(&ctx).await?;
        backfill::present(&mut doc, &labels);

        let resume = match ResumeDocument::from_partial(&doc) {
            Ok(resume) => resume,
            Err(first) => {
                warn!(violations = ?first.violations(), "gate failed, retrying from base document");
                let mut merged = backfill::targeted_merge(&base, &doc);
                backfill::present(&mut merged, &labels);
                ResumeDocument::from_partial(&merged)?
            }
        };
        info!("resume passed validation");
        job.profile = Some(resume.clone());

        ensure_live(cancel)?;
        self.render_and_persist(job, &resume, cancel).await?;

        job.status = JobStatus::Completed;
        job.touch();
        self.repo.save(job).await?;
        info!(
            html = %job.metadata.generated_html,
            pdf = %job.metadata.generated_pdf,
            "job completed"
        );
        Ok(())
    }

    async fn aggregate(
        &self,
        job: &mut Job,
        cancel: &Cancellation,
    ) -> Result<AggregateResult, ProcessError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
            r = self.aggregator.aggregate(job.user_id) => r,
        };
        let mut aggregated = result.unwrap_or_else(|e| {
            warn!(error = %e, "aggregation failed, continuing with empty data");
            job.metadata.ai_warnings.push(format!("aggregation unavailable: {e}"));
            AggregateResult::new()
        });

        let application_id = job
            .metadata
            .job_application_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        if let Some(id) = application_id {
            match self.aggregator.job_application(id).await {
                Ok(Some(row)) => aggregated.insert("job_application", row),
                Ok(None) => debug!(id, "job application not found"),
                Err(e) => warn!(id, error = %e, "job application lookup failed"),
            }
        }
        Ok(aggregated)
    }

    /// Asks the service to polish the user's showcase overrides and
    /// hard-merges the normalized result.
    async fn refine_overrides(
        &self,
        doc: &mut PartialResume,
        overrides: &Overrides,
        ctx: &CallContext,
    ) -> Result<(), ProcessError> {
        let payload = Value::Object(overrides.to_map());
        let output = match self.content.enrich_fields(&payload, &REFINED_KEYS, ctx).await {
            Ok(output) => output,
            Err(ContentError::Cancelled) => return Err(ProcessError::Cancelled),
            Err(e) => {
                warn!(error = %e, "override refinement failed (non-fatal)");
                return Ok(());
            }
        };
        let refined = Overrides::from_value(&output);
        if !refined.publications.is_empty() {
            doc.set(ResumeKey::Publications, refined.publications_value());
        }
        if !refined.certifications.is_empty() {
            doc.set(ResumeKey::Certifications, refined.certifications_value());
        }
        if !refined.extras.is_empty() {
            doc.set(ResumeKey::Extras, refined.extras_value());
        }
        Ok(())
    }

    async fn labels(&self, ctx: &CallContext) -> Result<BTreeMap<String, String>, ProcessError> {
        let mut labels = default_labels();
        match self.content.format_labels(&labels, ctx).await {
            Ok(localized) => {
                labels.extend(localized.into_iter().filter(|(_, v)| !v.trim().is_empty()))
            }
            Err(ContentError::Cancelled) => return Err(ProcessError::Cancelled),
            Err(e) => warn!(
                language = %ctx.language,
                error = %e,
                "label localization failed, using defaults"
            ),
        }
        Ok(labels)
    }

    async fn render_and_persist(
        &self,
        job: &mut Job,
        resume: &ResumeDocument,
        cancel: &Cancellation,
    ) -> Result<(), ProcessError> {
        let html = self.templater.render(resume).map_err(ProcessError::Template)?;
        let names = self.artifacts.names(Utc::now(), job.id);
        self.artifacts.write(&names.html, html.as_bytes()).await?;
        job.metadata.generated_html = names.html.display().to_string();

        match render_with_retry(self.renderer.as_ref(), &html, &self.render_retry, cancel).await? {
            Ok(pdf) => {
                self.artifacts.write(&names.pdf, &pdf).await?;
                let copy = self.artifacts.write_user_copy(job.user_id, &pdf).await?;
                job.metadata.generated_pdf = names.pdf.display().to_string();
                job.metadata.user_copy = copy.display().to_string();
                job.metadata.pdf_render_error = None;
            }
            Err(e) => {
                job.metadata.generated_pdf = String::new();
                job.metadata.user_copy = String::new();
                job.metadata.pdf_render_error = Some(e.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resume::{CertificationEntry, Extra};
    use crate::repository::MemoryJobsRepo;
    use crate::schema::{self, SchemaName};
    use crate::testing::{fixture_aggregate, ScriptedContent, StubAggregator, StubRenderer};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Harness {
        processor: Processor,
        content: Arc<ScriptedContent>,
        renderer: Arc<StubRenderer>,
        repo: Arc<MemoryJobsRepo>,
        dir: TempDir,
    }

    fn harness(
        content: ScriptedContent,
        aggregator: StubAggregator,
        renderer: StubRenderer,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let content = Arc::new(content);
        let renderer = Arc::new(renderer);
        let repo = Arc::new(MemoryJobsRepo::new());
        let processor = Processor::new(
            content.clone(),
            Arc::new(aggregator),
            repo.clone(),
            renderer.clone(),
            ArtifactStore::new(dir.path()),
        )
        .unwrap()
        .with_render_retry(RetryPolicy::new(3, Duration::from_millis(1)));
        Harness {
            processor,
            content,
            renderer,
            repo,
            dir,
        }
    }

    fn job_with_overrides() -> Job {
        let mut job = Job::new(Uuid::new_v4(), "english");
        job.overrides = json!({
            "publications": ["Short title"],
            "certifications": ["Certified Kubernetes Administrator"],
            "extras": "Open-source contributor"
        });
        job
    }

    #[tokio::test]
    async fn test_unreachable_service_falls_back_to_aggregate() {
        let h = harness(
            ScriptedContent::new(),
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::succeeding(),
        );
        let mut job = job_with_overrides();
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        let profile = job.profile.clone().unwrap();
        assert_eq!(profile.meta.name, "Grace Hopper");
        assert_eq!(
            profile.certifications,
            vec![CertificationEntry {
                name: "Certified Kubernetes Administrator".into(),
                issuer: None,
                date: None,
                url: None,
                url_label: None,
                description: None,
            }]
        );
        assert_eq!(
            profile.extras,
            vec![Extra {
                category: "misc".into(),
                text: "Open-source contributor".into(),
            }]
        );
        assert!(profile.publications[0].starts_with("Short title — "));
        schema::validate(&serde_json::to_value(&profile).unwrap(), SchemaName::FullResume).unwrap();

        assert!(!job.metadata.ai_warnings.is_empty());
        assert!(job.metadata.stage_report.iter().all(|r| r.valid && !r.enriched));
        assert!(Path::new(&job.metadata.generated_html).is_file());
        assert!(Path::new(&job.metadata.generated_pdf).is_file());
        assert!(job.metadata.generated_html.starts_with(h.dir.path().to_str().unwrap()));

        let saved = h.repo.find(job.id).await.unwrap().unwrap();
        assert_eq!(saved.status, JobStatus::Completed);
        assert_eq!(saved.profile, job.profile);
    }

    #[tokio::test]
    async fn test_no_data_and_no_service_fails_the_gate() {
        let h = harness(
            ScriptedContent::new(),
            StubAggregator::failing(),
            StubRenderer::succeeding(),
        );
        let mut job = job_with_overrides();
        let err = h.processor.process(&mut job, &Cancellation::new()).await.unwrap_err();
        assert!(matches!(err, ProcessError::Validation(_)), "got {err:?}");
        assert!(job.metadata.ai_warnings[0].starts_with("aggregation unavailable"));
        assert_eq!(h.renderer.calls(), 0);
    }

    #[tokio::test]
    async fn test_pdf_succeeds_on_third_attempt() {
        let h = harness(
            ScriptedContent::new(),
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::failing_then(2),
        );
        let mut job = job_with_overrides();
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        assert_eq!(h.renderer.calls(), 3);
        assert!(job.metadata.pdf_render_error.is_none());
        assert!(Path::new(&job.metadata.generated_pdf).is_file());
        let copy = Path::new(&job.metadata.user_copy);
        assert!(copy.is_file());
        assert!(copy.starts_with(h.dir.path().join("resumes").join(job.user_id.to_string())));
    }

    #[tokio::test]
    async fn test_pdf_exhaustion_keeps_html() {
        let h = harness(
            ScriptedContent::new(),
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::garbage(),
        );
        let mut job = job_with_overrides();
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(h.renderer.calls(), 3);
        assert_eq!(job.metadata.generated_pdf, "");
        assert_eq!(job.metadata.user_copy, "");
        assert!(job.metadata.pdf_render_error.is_some());
        assert!(Path::new(&job.metadata.generated_html).is_file());
    }

    fn generated_meta(social_links: Option<Value>) -> Value {
        let mut meta = json!({
            "name": "Ada Lovelace",
            "headline": "Principal Engineer",
            "contact": {"email": "ada@example.com"}
        });
        if let Some(links) = social_links {
            meta["social_links"] = links;
        }
        json!({"meta": meta, "snapshot": {"tech": "Rust, Go"}})
    }

    #[tokio::test]
    async fn test_aggregated_social_links_fill_generated_meta() {
        let content = ScriptedContent::new().with_meta(Ok(generated_meta(None)));
        let h = harness(
            content,
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::succeeding(),
        );
        let mut job = job_with_overrides();
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        let meta = job.profile.unwrap().meta;
        assert_eq!(meta.name, "Ada Lovelace");
        assert_eq!(
            meta.social_links.get("linkedin"),
            Some(&Some("https://linkedin.com/in/grace".to_string()))
        );
    }

    #[tokio::test]
    async fn test_generated_social_links_win() {
        let links = json!({"github": "https://github.com/ada"});
        let content = ScriptedContent::new().with_meta(Ok(generated_meta(Some(links))));
        let h = harness(
            content,
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::succeeding(),
        );
        let mut job = job_with_overrides();
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        let meta = job.profile.unwrap().meta;
        assert_eq!(meta.social_links.len(), 1);
        assert!(meta.social_links.contains_key("github"));
    }

    #[tokio::test]
    async fn test_synthesis_cannot_rename() {
        let content = ScriptedContent::new()
            .with_meta(Ok(generated_meta(None)))
            .with_synthesis(Ok(json!({
                "meta": {"name": "Mallory", "headline": "Impostor"},
                "summary": "x"
            })));
        let h = harness(
            content,
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::succeeding(),
        );
        let mut job = job_with_overrides();
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        let meta = job.profile.unwrap().meta;
        assert_eq!(meta.name, "Ada Lovelace");
        assert_eq!(meta.headline, "Principal Engineer");
    }

    #[tokio::test]
    async fn test_localized_labels_reach_document() {
        let content = ScriptedContent::new().with_labels(BTreeMap::from([(
            "experience".to_string(),
            "Berufserfahrung".to_string(),
        )]));
        let h = harness(
            content,
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::succeeding(),
        );
        let mut job = job_with_overrides();
        job.language = "german".into();
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        let labels = job.profile.unwrap().labels;
        assert_eq!(labels["experience"], "Berufserfahrung");
        assert_eq!(labels["publications"], "Publications");
        let html = std::fs::read_to_string(&job.metadata.generated_html).unwrap();
        assert!(html.contains("Berufserfahrung"));
    }

    #[tokio::test]
    async fn test_job_application_and_description_reach_payload() {
        let mut aggregator = StubAggregator::with(fixture_aggregate());
        aggregator.job_application = Some(json!({"company": "Initech", "title": "Staff Engineer"}));
        let h = harness(ScriptedContent::new(), aggregator, StubRenderer::succeeding());
        let mut job = job_with_overrides();
        job.job_description = "Build reliable payment systems".into();
        job.metadata.job_application_id = Some("app-42".into());
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        let payload = h.content.payload_for("meta").unwrap();
        assert_eq!(payload["aggregated"]["job_application"]["company"], "Initech");
        assert_eq!(payload["job_description"], "Build reliable payment systems");
        assert_eq!(
            payload["overrides"]["extras"],
            json!([{"category": "misc", "text": "Open-source contributor"}])
        );
    }

    #[tokio::test]
    async fn test_refined_publications_are_merged() {
        let refined =
            "Scaling Event Processing at Nimbus Labs: what three years of streaming taught us";
        let content = ScriptedContent::new().with_fields(Ok(json!({"publications": [refined]})));
        let h = harness(
            content,
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::succeeding(),
        );
        let mut job = job_with_overrides();
        h.processor.process(&mut job, &Cancellation::new()).await.unwrap();

        assert_eq!(job.profile.unwrap().publications, vec![refined.to_string()]);
        assert!(h
            .content
            .calls()
            .contains(&"enrich_fields[publications,certifications,extras]".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_job_stops() {
        let h = harness(
            ScriptedContent::new(),
            StubAggregator::with(fixture_aggregate()),
            StubRenderer::succeeding(),
        );
        let cancel = Cancellation::new();
        cancel.cancel();
        let mut job = job_with_overrides();
        let err = h.processor.process(&mut job, &cancel).await.unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
        assert!(h.content.calls().is_empty());
        assert!(h.repo.find(job.id).await.unwrap().is_none());
    }
}
