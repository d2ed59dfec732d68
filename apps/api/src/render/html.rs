//! Resume HTML via Handlebars. The template and stylesheet are compiled into
//! the binary; the stylesheet is inlined into `<head>` so the saved HTML
//! artifact renders standalone.

use std::collections::BTreeMap;

use handlebars::Handlebars;
use serde_json::json;

use crate::models::resume::ResumeDocument;
use crate::render::RenderError;

const TEMPLATE_NAME: &str = "resume";
const RESUME_TEMPLATE: &str = include_str!("templates/resume.hbs");
const STYLESHEET: &str = include_str!("templates/style.css");

/// English section headings, used when localized labels are unavailable.
pub fn default_labels() -> BTreeMap<String, String> {
    [
        ("professional_summary", "Professional Summary"),
        ("tech_snapshot", "Tech Snapshot"),
        ("top_achievements", "Top Achievements"),
        ("selected_projects", "Selected Projects"),
        ("experience", "Experience"),
        ("projects_case_studies", "Projects & Case Studies"),
        ("publications", "Publications"),
        ("certifications", "Certifications"),
        ("continuous_learning_community", "Continuous Learning & Community"),
        ("extras", "Extras"),
        ("page_2_projects_publications", "Projects & Publications"),
        ("references_available", "References available upon request"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub struct HtmlTemplater {
    handlebars: Handlebars<'static>,
}

impl HtmlTemplater {
    pub fn new() -> Result<Self, RenderError> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string(TEMPLATE_NAME, RESUME_TEMPLATE)
            .map_err(|e| RenderError::Template(e.to_string()))?;
        Ok(Self { handlebars })
    }

    /// Renders the document. Missing labels fall back to the English defaults.
    pub fn render(&self, resume: &ResumeDocument) -> Result<String, RenderError> {
        let mut labels = default_labels();
        labels.extend(
            resume
                .labels
                .iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        let data = json!({ "profile": resume, "labels": labels });
        let html = self
            .handlebars
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| RenderError::Template(e.to_string()))?;
        Ok(inline_stylesheet(&html, STYLESHEET))
    }
}

/// Injects `css` right after `<head>`, or prepends it when there is no head.
pub fn inline_stylesheet(html: &str, css: &str) -> String {
    if css.is_empty() {
        return html.to_string();
    }
    let block = format!("<style>{css}</style>");
    match html.to_ascii_lowercase().find("<head>") {
        Some(idx) => {
            let at = idx + "<head>".len();
            format!("{}{block}{}", &html[..at], &html[at..])
        }
        None => format!("{block}{html}"),
    }
}
