//! Post-merge backfill, deterministic fallback and presentation.
//!
//! Aggregated profile data is the source of truth for identity (name,
//! headline, contact, social links). Everything here is local: no network
//! calls, and nothing that is already valid gets replaced.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::aggregate::AggregateResult;
use crate::models::resume::{PartialResume, ResumeKey};
use crate::overrides::{truncate_words, Overrides};
use crate::pipeline::enrich::is_blank;
use crate::pipeline::stages::{key_is_valid, Stage, SUMMARY_MAX_CHARS, SUMMARY_MIN_CHARS};

const HEADLINE_MAX: usize = 200;
const TECH_MAX: usize = 250;
const BULLET_MAX: usize = 300;
const PROJECT_TITLE_MAX: usize = 120;
const PROJECT_DESCRIPTION_MAX: usize = 330;
const SELECTED_PROJECTS: usize = 3;
const LIST_KEYS: [ResumeKey; 3] = [
    ResumeKey::Publications,
    ResumeKey::Certifications,
    ResumeKey::Extras,
];

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn non_empty_object(value: Option<&Value>) -> Option<&Map<String, Value>> {
    value.and_then(Value::as_object).filter(|o| !o.is_empty())
}

// ────────────────────────────────────────────────────────────────────────────
// Identity
// ────────────────────────────────────────────────────────────────────────────

fn contact_from(profile: &Map<String, Value>) -> Option<Value> {
    match profile.get("contact") {
        Some(Value::Object(c)) if !c.is_empty() => return Some(Value::Object(c.clone())),
        Some(Value::String(s)) if !s.trim().is_empty() => return Some(json!({ "email": s.trim() })),
        _ => {}
    }
    let contact: Map<String, Value> = ["email", "phone", "location", "website"]
        .into_iter()
        .filter_map(|k| {
            first_str(profile, &[k]).map(|v| (k.to_string(), Value::String(v.to_string())))
        })
        .collect();
    (!contact.is_empty()).then_some(Value::Object(contact))
}

/// Identity fields from the first aggregated profile: either its nested
/// `meta` object or its flat columns. The `user` row fills name and email
/// when the profile lacks them.
pub fn profile_meta(agg: &AggregateResult) -> Option<Map<String, Value>> {
    let profile = agg.first_profile();
    let user = agg.get("user").and_then(Value::as_object);
    if profile.is_none() && user.is_none() {
        return None;
    }

    if let Some(meta) = profile.and_then(|p| p.get("meta")).and_then(Value::as_object) {
        return Some(meta.clone());
    }

    let mut meta = Map::new();
    let sources = profile.into_iter().chain(user);
    for source in sources {
        if !meta.contains_key("name") {
            if let Some(name) = first_str(source, &["name", "full_name", "display_name"]) {
                meta.insert("name".into(), json!(name));
            }
        }
        if !meta.contains_key("headline") {
            if let Some(headline) = first_str(source, &["headline", "title"]) {
                meta.insert("headline".into(), json!(truncate_words(headline, HEADLINE_MAX)));
            }
        }
        if !meta.contains_key("contact") {
            if let Some(contact) = contact_from(source) {
                meta.insert("contact".into(), contact);
            }
        }
        if !meta.contains_key("social_links") {
            if let Some(links) = non_empty_object(source.get("social_links")) {
                meta.insert("social_links".into(), Value::Object(links.clone()));
            }
        }
    }
    Some(meta)
}

/// Fills missing or blank `meta.name`, `meta.headline`, `meta.contact` and
/// `meta.social_links` from aggregated data. Non-empty generated values win.
pub fn backfill_meta(doc: &mut PartialResume, agg: &AggregateResult) -> bool {
    let Some(source) = profile_meta(agg) else {
        return false;
    };
    let meta = doc.object_mut(ResumeKey::Meta);
    let mut changed = false;

    for field in ["name", "headline"] {
        if is_blank(meta.get(field)) {
            if let Some(value) = first_str(&source, &[field]) {
                meta.insert(field.to_string(), json!(value));
                changed = true;
            }
        }
    }
    if non_empty_object(meta.get("contact")).is_none() {
        if let Some(contact) = non_empty_object(source.get("contact")) {
            meta.insert("contact".to_string(), Value::Object(contact.clone()));
            changed = true;
        }
    }
    if non_empty_object(meta.get("social_links")).is_none() {
        if let Some(links) = non_empty_object(source.get("social_links")) {
            meta.insert("social_links".to_string(), Value::Object(links.clone()));
            changed = true;
        }
    }
    changed
}

/// Publications and certifications absent or empty after the stages are
/// taken from aggregated rows through the override normalizer.
pub fn backfill_showcase(doc: &mut PartialResume, agg: &AggregateResult) {
    if is_blank(doc.get(ResumeKey::Publications)) {
        let rows = Value::Array(agg.rows("publications").to_vec());
        let normalized = Overrides::from_value(&json!({ "publications": rows }));
        if !normalized.publications.is_empty() {
            debug!(count = normalized.publications.len(), "publications backfilled from aggregate");
            doc.set(ResumeKey::Publications, normalized.publications_value());
        }
    }
    if is_blank(doc.get(ResumeKey::Certifications)) {
        let rows = Value::Array(agg.rows("certifications").to_vec());
        let normalized = Overrides::from_value(&json!({ "certifications": rows }));
        if !normalized.certifications.is_empty() {
            debug!(
                count = normalized.certifications.len(),
                "certifications backfilled from aggregate"
            );
            doc.set(ResumeKey::Certifications, normalized.certifications_value());
        }
    }
}

/// Seeds the working document with the user's normalized overrides before
/// any stage runs. Passthrough keys naming a resume field are taken when valid.
pub fn seed_from_overrides(doc: &mut PartialResume, overrides: &Overrides) {
    if !overrides.publications.is_empty() {
        doc.set(ResumeKey::Publications, overrides.publications_value());
    }
    if !overrides.certifications.is_empty() {
        doc.set(ResumeKey::Certifications, overrides.certifications_value());
    }
    if !overrides.extras.is_empty() {
        doc.set(ResumeKey::Extras, overrides.extras_value());
    }
    for (name, value) in &overrides.other {
        let Some(key) = ResumeKey::parse(name) else {
            continue;
        };
        if key != ResumeKey::Labels && !doc.is_set(key) && key_is_valid(key, Some(value)) {
            doc.set(key, value.clone());
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Deterministic fallback
// ────────────────────────────────────────────────────────────────────────────

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(o) => first_str(o, &["name", "title", "text"]).map(str::to_string),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn tech_line(agg: &AggregateResult) -> Option<String> {
    let mut tech = agg
        .first_profile()
        .map(|p| {
            ["skills", "technologies", "tech_stack"]
                .iter()
                .map(|k| string_list(p.get(*k)))
                .find(|l| !l.is_empty())
                .unwrap_or_default()
        })
        .unwrap_or_default();
    if tech.is_empty() {
        tech = agg
            .objects("project_technologies")
            .filter_map(|row| first_str(row, &["name", "technology"]).map(str::to_string))
            .collect();
        tech.dedup();
    }
    (!tech.is_empty()).then(|| truncate_words(&tech.join(", "), TECH_MAX))
}

fn year_of(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    (raw.len() >= 4 && raw.is_char_boundary(4) && raw[..4].chars().all(|c| c.is_ascii_digit()))
        .then(|| &raw[..4])
}

fn period_of(row: &Map<String, Value>) -> Option<String> {
    if let Some(period) = first_str(row, &["period"]) {
        return Some(period.to_string());
    }
    let start = first_str(row, &["start_date", "from", "started_at"])?;
    let start = year_of(start).unwrap_or(start);
    let end = first_str(row, &["end_date", "to", "ended_at"])
        .map(|e| year_of(e).unwrap_or(e))
        .unwrap_or("Present");
    Some(format!("{start} – {end}"))
}

fn sentences(text: &str) -> Vec<String> {
    text.split(". ")
        .map(|s| s.trim().trim_end_matches('.').trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn bullets_of(row: &Map<String, Value>) -> Vec<String> {
    let listed = ["bullets", "achievements", "highlights"]
        .iter()
        .map(|k| string_list(row.get(*k)))
        .find(|l| !l.is_empty());
    let bullets = match listed {
        Some(list) => list,
        None => first_str(row, &["description", "summary"])
            .map(sentences)
            .unwrap_or_default(),
    };
    bullets
        .into_iter()
        .map(|b| truncate_words(&b, BULLET_MAX))
        .collect()
}

fn experience_from(agg: &AggregateResult) -> Value {
    let roles: Vec<Value> = agg
        .objects("experiences")
        .filter_map(|row| {
            let company = first_str(row, &["company", "company_name", "organization", "employer"])?;
            let role = first_str(row, &["role", "title", "position"])?;
            let bullets = bullets_of(row);
            if bullets.is_empty() {
                return None;
            }
            let mut out = Map::new();
            out.insert("company".into(), json!(company));
            out.insert("role".into(), json!(role));
            if let Some(period) = period_of(row) {
                out.insert("period".into(), json!(period));
            }
            if let Some(location) = first_str(row, &["location"]) {
                out.insert("location".into(), json!(location));
            }
            out.insert("bullets".into(), json!(bullets));
            Some(Value::Object(out))
        })
        .collect();
    Value::Array(roles)
}

fn project_rows(agg: &AggregateResult) -> impl Iterator<Item = &Map<String, Value>> {
    agg.objects("projects").chain(agg.objects("case_studies"))
}

fn projects_from(agg: &AggregateResult) -> Value {
    let projects: Vec<Value> = project_rows(agg)
        .filter_map(|row| {
            let title = first_str(row, &["title", "name"])?;
            let description = first_str(row, &["description", "summary", "outline"])?;
            let mut out = Map::new();
            if let Some(id) = row.get("id").and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }) {
                out.insert("id".into(), json!(id));
            }
            out.insert("title".into(), json!(truncate_words(title, PROJECT_TITLE_MAX)));
            if let Some(url) = first_str(row, &["url", "link", "repository_url"]) {
                out.insert("url".into(), json!(url));
            }
            let stack = string_list(row.get("technologies").or_else(|| row.get("stack")));
            if !stack.is_empty() {
                out.insert("stack".into(), json!(stack.join(", ")));
            }
            out.insert(
                "description".into(),
                json!(truncate_words(description, PROJECT_DESCRIPTION_MAX)),
            );
            Some(Value::Object(out))
        })
        .collect();
    Value::Array(projects)
}

fn summary_from(agg: &AggregateResult) -> Option<Value> {
    let profile = agg.first_profile()?;
    let bio = first_str(profile, &["summary", "bio", "about"])?;
    let mut summary = bio.to_string();
    if summary.chars().count() < SUMMARY_MIN_CHARS {
        if let Some(headline) = first_str(profile, &["headline", "title"]) {
            summary = format!("{headline}. {summary}");
        }
    }
    let summary = truncate_words(&summary, SUMMARY_MAX_CHARS);
    (summary.chars().count() >= SUMMARY_MIN_CHARS).then(|| json!(summary))
}

fn snapshot_from(doc: &PartialResume, agg: &AggregateResult) -> Option<Value> {
    let mut snapshot = doc
        .get(ResumeKey::Snapshot)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if is_blank(snapshot.get("tech")) {
        snapshot.insert("tech".into(), json!(tech_line(agg)?));
    }
    if is_blank(snapshot.get("selected_projects")) {
        let titles: Vec<String> = project_rows(agg)
            .filter_map(|row| first_str(row, &["title", "name"]))
            .take(SELECTED_PROJECTS)
            .map(|t| truncate_words(t, PROJECT_TITLE_MAX))
            .collect();
        if !titles.is_empty() {
            snapshot.insert("selected_projects".into(), json!(titles));
        }
    }
    Some(Value::Object(snapshot))
}

fn extras_from(agg: &AggregateResult, overrides: &Overrides) -> Value {
    let rows = Value::Array(agg.rows("extras").to_vec());
    let normalized = Overrides::from_value(&json!({ "extras": rows }));
    if normalized.extras.is_empty() {
        overrides.extras_value()
    } else {
        normalized.extras_value()
    }
}

fn fallback_value(
    key: ResumeKey,
    doc: &PartialResume,
    agg: &AggregateResult,
    overrides: &Overrides,
) -> Option<Value> {
    match key {
        ResumeKey::Summary => summary_from(agg),
        ResumeKey::Snapshot => snapshot_from(doc, agg),
        ResumeKey::Experience => Some(experience_from(agg)),
        ResumeKey::Projects => Some(projects_from(agg)),
        ResumeKey::Extras => Some(extras_from(agg, overrides)),
        ResumeKey::Publications if !overrides.publications.is_empty() => {
            Some(overrides.publications_value())
        }
        ResumeKey::Certifications if !overrides.certifications.is_empty() => {
            Some(overrides.certifications_value())
        }
        // Identity comes from `backfill_meta`; labels from presentation.
        _ => None,
    }
}

/// Fills the stage's still-invalid keys from aggregated data. Returns the
/// keys that were filled.
pub fn fallback_stage(
    stage: Stage,
    doc: &mut PartialResume,
    agg: &AggregateResult,
    overrides: &Overrides,
) -> Vec<ResumeKey> {
    let mut filled = Vec::new();
    for &key in stage.owned_keys() {
        if key_is_valid(key, doc.get(key)) {
            continue;
        }
        let Some(candidate) = fallback_value(key, doc, agg, overrides) else {
            continue;
        };
        if key_is_valid(key, Some(&candidate)) {
            doc.set(key, candidate);
            filled.push(key);
        }
    }
    if !filled.is_empty() {
        debug!(%stage, keys = ?filled, "filled from aggregate");
    }
    filled
}

// ────────────────────────────────────────────────────────────────────────────
// Presentation and the targeted merge
// ────────────────────────────────────────────────────────────────────────────

/// Year-only date for compact display: a leading 4-digit year, else the
/// first 4-digit run that looks like a year.
pub fn compact_year(date: &str) -> Option<String> {
    if let Some(year) = year_of(date) {
        return Some(year.to_string());
    }
    let chars: Vec<char> = date.chars().collect();
    chars
        .windows(4)
        .enumerate()
        .find(|(i, w)| {
            w.iter().all(char::is_ascii_digit)
                && (w[0] == '1' || w[0] == '2')
                && !chars.get(i + 4).is_some_and(char::is_ascii_digit)
                && !(*i > 0 && chars[i - 1].is_ascii_digit())
        })
        .map(|(_, w)| w.iter().collect())
}

/// Short label for a certification link: the host without `www.`, else the
/// issuer, else "link".
pub fn url_label(url: &str, issuer: Option<&str>) -> String {
    let trimmed = url.trim();
    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    Url::parse(&candidate)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .filter(|h| !h.is_empty())
        .or_else(|| issuer.map(str::trim).filter(|i| !i.is_empty()).map(str::to_string))
        .unwrap_or_else(|| "link".to_string())
}

/// Certification dates compacted to the year, `url_label` computed for
/// linked certifications, and the section labels attached.
pub fn present(doc: &mut PartialResume, labels: &BTreeMap<String, String>) {
    if let Some(certs) = doc.get_mut(ResumeKey::Certifications).and_then(Value::as_array_mut) {
        for cert in certs.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(year) = cert.get("date").and_then(Value::as_str).and_then(compact_year) {
                cert.insert("date".into(), json!(year));
            }
            let url = cert.get("url").and_then(Value::as_str).filter(|u| !u.trim().is_empty());
            if let Some(url) = url {
                let label = url_label(url, cert.get("issuer").and_then(Value::as_str));
                cert.insert("url_label".into(), json!(label));
            }
        }
    }
    doc.set(ResumeKey::Labels, json!(labels));
}

/// Copies only `publications`, `certifications` and `extras` (normalized)
/// from the current document onto the base.
pub fn targeted_merge(base: &PartialResume, current: &PartialResume) -> PartialResume {
    let mut merged = base.clone();
    let lists: Map<String, Value> = LIST_KEYS
        .into_iter()
        .filter_map(|k| current.get(k).map(|v| (k.as_str().to_string(), v.clone())))
        .collect();
    let normalized = Overrides::from_value(&Value::Object(lists));
    if !normalized.publications.is_empty() {
        merged.set(ResumeKey::Publications, normalized.publications_value());
    }
    if !normalized.certifications.is_empty() {
        merged.set(ResumeKey::Certifications, normalized.certifications_value());
    }
    if !normalized.extras.is_empty() {
        merged.set(ResumeKey::Extras, normalized.extras_value());
    }
    merged
}
