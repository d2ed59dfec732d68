//! Artifact layout under the configured root and the PDF render loop.
//!
//! ```text
//! <root>/generated/resume_<ts>_<job_id>.html
//! <root>/generated/resume_<ts>_<job_id>.pdf
//! <root>/resumes/<user_id>/<uuid>.pdf
//! ```

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::Cancellation;
use crate::render::{is_pdf, RenderError, Renderer};
use crate::retry::{Cancelled, RetryPolicy};

const GENERATED_DIR: &str = "generated";
const USER_COPIES_DIR: &str = "resumes";

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactNames {
    pub html: PathBuf,
    pub pdf: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Names shared by the HTML and PDF of one job. The job id keeps
    /// concurrent jobs finishing in the same millisecond apart.
    pub fn names(&self, now: DateTime<Utc>, job_id: Uuid) -> ArtifactNames {
        let stem = format!("resume_{}_{}", now.format("%Y%m%dT%H%M%S_%3f"), job_id.simple());
        let dir = self.root.join(GENERATED_DIR);
        ArtifactNames {
            html: dir.join(format!("{stem}.html")),
            pdf: dir.join(format!("{stem}.pdf")),
        }
    }

    pub async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await
    }

    /// Stores the user's copy under a fresh random name and returns its path.
    pub async fn write_user_copy(&self, user_id: Uuid, pdf: &[u8]) -> std::io::Result<PathBuf> {
        let path = self
            .root
            .join(USER_COPIES_DIR)
            .join(user_id.to_string())
            .join(format!("{}.pdf", Uuid::new_v4()));
        self.write(&path, pdf).await?;
        Ok(path)
    }
}

/// Renders with retries. The outer error is cancellation (fatal to the job);
/// the inner one is the last failure once attempts are exhausted.
pub async fn render_with_retry(
    renderer: &dyn Renderer,
    html: &str,
    policy: &RetryPolicy,
    cancel: &Cancellation,
) -> Result<Result<Bytes, RenderError>, Cancelled> {
    let mut attempt = 0;
    loop {
        let result = renderer
            .render_html_to_pdf(html, cancel)
            .await
            .and_then(|pdf| {
                if is_pdf(&pdf) {
                    Ok(pdf)
                } else {
                    Err(RenderError::InvalidOutput { len: pdf.len() })
                }
            });

        match result {
            Ok(pdf) => {
                info!(attempt = attempt + 1, bytes = pdf.len(), "pdf rendered");
                return Ok(Ok(pdf));
            }
            Err(RenderError::Cancelled) => return Err(Cancelled),
            Err(e) if !policy.has_next(attempt) => {
                warn!(attempts = policy.attempts, error = %e, "pdf render exhausted");
                return Ok(Err(e));
            }
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "pdf render failed");
                policy.backoff(attempt, "pdf render", cancel).await?;
                attempt += 1;
            }
        }
    }
}
