//! Stage enrichment: call, check, escalate, scoped merge.
//!
//! Enrichment is monotonic and scoped. A stage only ever writes its own
//! `merge_keys`; a key that is already valid is never replaced; object keys
//! (`meta`, `snapshot`) are filled field by field where blank. Synthesis can
//! never write `meta.name` or `meta.headline`.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::llm_client::{CallContext, ContentError, ContentService};
use crate::models::resume::{PartialResume, ResumeKey};
use crate::overrides::{truncate_words, Overrides};
use crate::pipeline::stages::{key_is_valid, Stage, StageValidationResult};
use crate::retry::Cancelled;
use crate::schema;

/// Producer certification descriptions are cut to this many characters.
pub const CERT_DESCRIPTION_MAX: usize = 140;

/// What one stage run did.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: Stage,
    /// Validator result before any call was made.
    pub before: StageValidationResult,
    /// Fresh validator result after merging.
    pub after: StageValidationResult,
    /// Whether anything was merged into the document.
    pub enriched: bool,
}

/// Inputs shared by every stage of one job.
pub struct StageInputs<'a> {
    /// `{aggregated, overrides, job_description?}`
    pub payload: &'a Value,
    pub overrides: &'a Overrides,
    pub service: &'a dyn ContentService,
    pub ctx: &'a CallContext,
}

fn aggregated(payload: &Value) -> Value {
    payload.get("aggregated").cloned().unwrap_or(Value::Null)
}

/// Blank means "nothing useful here": null, empty string, empty list or object.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// Coerces recurring producer mistakes before anything is checked.
pub fn coerce_output(value: &mut Value) {
    if let Some(meta) = value.get_mut("meta").and_then(Value::as_object_mut) {
        if let Some(Value::String(contact)) = meta.get("contact") {
            let email = contact.trim().to_string();
            meta.insert("contact".to_string(), json!({ "email": email }));
        }
    }
    if let Some(certs) = value.get_mut("certifications").and_then(Value::as_array_mut) {
        for cert in certs.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(Value::String(desc)) = cert.get("description") {
                if desc.chars().count() > CERT_DESCRIPTION_MAX {
                    let cut = truncate_words(desc, CERT_DESCRIPTION_MAX);
                    cert.insert("description".to_string(), Value::String(cut));
                }
            }
        }
    }
}

/// Whether the schema reports anything at or below `/<field>`.
fn field_has_violations(key: ResumeKey, object: &Map<String, Value>, field: &str) -> bool {
    let Err(e) = schema::validate_property(key.as_str(), &Value::Object(object.clone())) else {
        return false;
    };
    let exact = format!("/{field}:");
    let nested = format!("/{field}/");
    e.violations()
        .iter()
        .any(|v| v.starts_with(&exact) || v.starts_with(&nested))
}

/// Fills blank fields of an object key from the candidate. A field is only
/// taken when the schema accepts it.
fn fill_blanks(
    doc: &mut PartialResume,
    key: ResumeKey,
    candidate: &Map<String, Value>,
    protected: &[&str],
) -> bool {
    let mut working = doc
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let mut changed = false;

    for (field, value) in candidate {
        if protected.contains(&field.as_str()) || is_blank(Some(value)) {
            continue;
        }
        if !is_blank(working.get(field)) {
            continue;
        }
        let previous = working.insert(field.clone(), value.clone());
        if field_has_violations(key, &working, field) {
            match previous {
                Some(p) => working.insert(field.clone(), p),
                None => working.remove(field),
            };
            continue;
        }
        changed = true;
    }

    if changed {
        *doc.object_mut(key) = working;
    }
    changed
}

/// Merges one candidate key into the document under the scoped-merge rules.
pub fn merge_key(stage: Stage, doc: &mut PartialResume, key: ResumeKey, candidate: &Value) -> bool {
    if !stage.merge_keys().contains(&key) {
        return false;
    }
    match key {
        ResumeKey::Meta | ResumeKey::Snapshot => match candidate.as_object() {
            Some(obj) => fill_blanks(doc, key, obj, stage.protected_meta_fields()),
            None => false,
        },
        _ => {
            if key_is_valid(key, doc.get(key)) || !key_is_valid(key, Some(candidate)) {
                return false;
            }
            doc.set(key, candidate.clone());
            true
        }
    }
}

/// Merges every mergeable key of a producer output. Keys outside the stage's
/// scope are ignored.
pub fn merge_output(
    stage: Stage,
    doc: &mut PartialResume,
    output: &Value,
    only: &[ResumeKey],
) -> bool {
    let mut output = output.clone();
    coerce_output(&mut output);
    let candidate = PartialResume::from_value(&output);

    let mut changed = false;
    for &key in stage.merge_keys() {
        if !only.is_empty() && !only.contains(&key) {
            continue;
        }
        if let Some(value) = candidate.get(key) {
            if merge_key(stage, doc, key, value) {
                debug!(%stage, key = key.as_str(), "merged");
                changed = true;
            }
        }
    }
    changed
}

/// Owned keys that are still unacceptable in the document.
pub fn offending_keys(stage: Stage, doc: &PartialResume) -> Vec<ResumeKey> {
    stage
        .owned_keys()
        .iter()
        .copied()
        .filter(|&key| !key_is_valid(key, doc.get(key)))
        .collect()
}

async fn narrow_call(
    stage: Stage,
    doc: &PartialResume,
    inputs: &StageInputs<'_>,
) -> Result<Value, ContentError> {
    let StageInputs { payload, service, ctx, .. } = inputs;
    match stage {
        Stage::Foundation => service.generate_meta(payload, ctx).await,
        Stage::ProfessionalHistory => service.generate_experience(payload, ctx).await,
        Stage::Showcase => service.generate_showcase(payload, ctx).await,
        Stage::Synthesis => {
            let assembled = json!({
                "assembled": doc.to_value(),
                "aggregated": aggregated(payload),
            });
            service.generate_synthesis(&assembled, ctx).await
        }
    }
}

/// Absorbs soft failures, surfaces cancellation.
fn soft(
    stage: Stage,
    step: &str,
    result: Result<Value, ContentError>,
) -> Result<Option<Value>, Cancelled> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ContentError::Cancelled) => Err(Cancelled),
        Err(e) => {
            warn!(%stage, step, error = %e, "enrichment call failed (non-fatal)");
            Ok(None)
        }
    }
}

/// Runs one stage: validate, call if needed, escalate, merge, re-validate.
/// Only cancellation is an error; everything else leaves the stage
/// not-enriched and the pipeline continues.
pub async fn run_stage(
    stage: Stage,
    doc: &mut PartialResume,
    inputs: &StageInputs<'_>,
) -> Result<StageOutcome, Cancelled> {
    let before = stage.validate(doc);
    if before.valid {
        debug!(%stage, "already valid, skipping");
        return Ok(StageOutcome {
            stage,
            after: before.clone(),
            before,
            enriched: false,
        });
    }
    info!(%stage, missing = ?before.missing, "enriching");

    let mut enriched = false;
    let narrow = soft(stage, "narrow", narrow_call(stage, doc, inputs).await)?;

    // A failed narrow call ends the stage.
    if let Some(output) = narrow {
        enriched |= merge_output(stage, doc, &output, &[]);

        let offending = offending_keys(stage, doc);
        if !offending.is_empty() {
            let fields: Vec<&str> = offending.iter().map(|k| k.as_str()).collect();
            let current: Map<String, Value> = offending
                .iter()
                .filter_map(|k| doc.get(*k).map(|v| (k.as_str().to_string(), v.clone())))
                .collect();
            let payload = json!({
                "fields": fields,
                "current": current,
                "aggregated": aggregated(inputs.payload),
                "overrides": inputs.overrides.to_map(),
            });
            let result = inputs.service.enrich_fields(&payload, &offending, inputs.ctx).await;
            if let Some(output) = soft(stage, "enrich_fields", result)? {
                enriched |= merge_output(stage, doc, &output, &offending);
            }
        }

        if !offending_keys(stage, doc).is_empty() {
            let payload = json!({
                "document": doc.to_value(),
                "aggregated": aggregated(inputs.payload),
                "overrides": inputs.overrides.to_map(),
            });
            let result = inputs.service.enrich_full(&payload, inputs.ctx).await;
            if let Some(output) = soft(stage, "enrich_full", result)? {
                enriched |= merge_output(stage, doc, &output, &[]);
            }
        }
    }

    let after = stage.validate(doc);
    if after.valid {
        info!(%stage, "validated");
    } else {
        warn!(%stage, missing = ?after.missing, "still invalid after enrichment");
    }
    Ok(StageOutcome {
        stage,
        before,
        after,
        enriched,
    })
}
