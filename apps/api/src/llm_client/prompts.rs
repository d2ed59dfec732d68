// Prompt construction for the content service.
// Every instruction carries the relevant schema slice, explicit per-field
// constraints and the target language; the payload is appended as JSON.

use std::fmt;

use serde_json::Value;

use crate::models::resume::ResumeKey;
use crate::schema::{self, SchemaName};

/// Shared output contract appended to every instruction.
pub const JSON_ONLY: &str = "Respond with a single JSON object only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT invent employers, dates, metrics or links that are not present in the input.";

const META_RULES: &str = "\
- meta.name: the person's full name, non-empty.
- meta.headline: one line, non-empty, at most 200 characters.
- meta.contact: an object such as {\"email\": \"...\", \"phone\": \"...\", \"location\": \"...\"}, never a bare string.
- meta.social_links: an object mapping network name to URL; copy links from the input, never drop them.
- snapshot.tech: one line listing core technologies, at most 250 characters.
- snapshot.achievements: up to 3 items, each at most 210 characters.
- snapshot.selected_projects: up to 3 project titles, each at most 200 characters.";

const EXPERIENCE_RULES: &str = "\
- experience: a non-empty array, most recent role first.
- each role: non-empty company and role, optional period and location, 2-5 bullets of at most 300 characters each.
- role summary, when present, at most 330 characters.";

const SHOWCASE_RULES: &str = "\
- projects: a non-empty array; each project has a title (at most 120 characters) and a description (at most 330 characters).
- publications: a non-empty array of strings, each between 40 and 400 characters.
- certifications: a non-empty array of objects with a non-empty name; issuer, date, url optional; description at most 140 characters.
- extras: objects with category and text (text at most 140 characters).";

const SYNTHESIS_RULES: &str = "\
- summary: a professional summary between 80 and 330 characters.
- extras: a non-empty array of {\"category\", \"text\"} objects, text at most 140 characters.
- meta: you may polish contact or social_links, but never change meta.name or meta.headline.";

/// One content-service request type.
#[derive(Debug, Clone, Copy)]
pub enum Task<'a> {
    Meta,
    Experience,
    Showcase,
    Synthesis,
    /// Regenerate only the named top-level keys.
    Fields(&'a [ResumeKey]),
    /// Regenerate the whole document.
    Full,
    Labels,
}

impl fmt::Display for Task<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Meta => f.write_str("meta"),
            Task::Experience => f.write_str("experience"),
            Task::Showcase => f.write_str("showcase"),
            Task::Synthesis => f.write_str("synthesis"),
            Task::Fields(keys) => {
                let names: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
                write!(f, "enrich_fields[{}]", names.join(","))
            }
            Task::Full => f.write_str("enrich_full"),
            Task::Labels => f.write_str("labels"),
        }
    }
}

fn fields_rules(keys: &[ResumeKey]) -> String {
    let mut rules = Vec::new();
    for key in keys {
        let block = match key {
            ResumeKey::Meta | ResumeKey::Snapshot => META_RULES,
            ResumeKey::Experience => EXPERIENCE_RULES,
            ResumeKey::Projects
            | ResumeKey::Publications
            | ResumeKey::Certifications => SHOWCASE_RULES,
            ResumeKey::Summary | ResumeKey::Extras => SYNTHESIS_RULES,
            ResumeKey::Labels => continue,
        };
        if !rules.contains(&block) {
            rules.push(block);
        }
    }
    rules.join("\n")
}

fn instruction(task: Task<'_>, language: &str) -> String {
    match task {
        Task::Meta => format!(
            "Produce the resume header. Return an object with keys \"meta\" and \"snapshot\".\n\
             Write in {language}.\nConstraints:\n{META_RULES}\nSchema:\n{}",
            schema::schema_text(SchemaName::ProfileSlice)
        ),
        Task::Experience => format!(
            "Produce the professional history. Return an object with key \"experience\".\n\
             Write in {language}.\nConstraints:\n{EXPERIENCE_RULES}\nSchema:\n{}",
            schema::schema_text(SchemaName::ExperienceSlice)
        ),
        Task::Showcase => format!(
            "Produce the showcase sections. Return an object with keys \"projects\", \
             \"publications\" and \"certifications\".\n\
             Write in {language}.\nConstraints:\n{SHOWCASE_RULES}\nSchemas:\n{}\n{}",
            schema::schema_text(SchemaName::ExperienceSlice),
            schema::schema_text(SchemaName::PublicationsSlice)
        ),
        Task::Synthesis => format!(
            "Write the closing synthesis from the assembled resume. Return an object with \
             keys \"summary\", \"extras\" and optionally \"meta\".\n\
             Write in {language}.\nConstraints:\n{SYNTHESIS_RULES}\nSchema:\n{}",
            schema::schema_text(SchemaName::ProfileSlice)
        ),
        Task::Fields(keys) => {
            let names: Vec<String> = keys.iter().map(|k| format!("\"{k}\"")).collect();
            format!(
                "Fix the following resume fields so they satisfy the schema. Return an object \
                 containing exactly these keys: {}.\n\
                 Write in {language}.\nConstraints:\n{}\nSchema:\n{}",
                names.join(", "),
                fields_rules(keys),
                schema::schema_text(SchemaName::FullResume)
            )
        }
        Task::Full => format!(
            "Produce the complete resume document from the input. Every required field must be \
             present.\nWrite in {language}.\nConstraints:\n{META_RULES}\n{EXPERIENCE_RULES}\n\
             {SHOWCASE_RULES}\n{SYNTHESIS_RULES}\nSchema:\n{}",
            schema::schema_text(SchemaName::FullResume)
        ),
        Task::Labels => format!(
            "Translate the section headings below into {language}. Return an object with the \
             same keys and translated string values. Keep them short."
        ),
    }
}

/// Builds the full request text: instruction, output contract, then the payload.
pub fn build(task: Task<'_>, payload: &Value, language: &str) -> String {
    let payload = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    format!(
        "{}\n\n{JSON_ONLY}\n\nInput:\n{payload}",
        instruction(task, language)
    )
}
