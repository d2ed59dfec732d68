//! HTML templating and PDF rendering.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::cancel::Cancellation;

pub mod html;
pub mod pdf;

/// Every accepted PDF starts with these bytes.
pub const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch renderer: {0}")]
    Launch(std::io::Error),

    #[error("renderer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("invalid PDF output (len={len})")]
    InvalidOutput { len: usize },

    #[error("render cancelled")]
    Cancelled,

    #[error("template error: {0}")]
    Template(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Converts an HTML document into PDF bytes.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render_html_to_pdf(
        &self,
        html: &str,
        cancel: &Cancellation,
    ) -> Result<Bytes, RenderError>;
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}
