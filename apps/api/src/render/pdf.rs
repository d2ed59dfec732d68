//! PDF rendering through headless Chromium (`--print-to-pdf`).
//!
//! Each render gets its own temporary directory holding the input HTML and
//! the output PDF; the directory is removed when the render finishes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::debug;

use crate::cancel::Cancellation;
use crate::render::{is_pdf, RenderError, Renderer};

const CHROME_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "headless-shell",
];

const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    binary: PathBuf,
    timeout: Duration,
}

impl ChromiumRenderer {
    /// Uses `chrome_path` when given, else the first known browser on `PATH`.
    pub fn new(chrome_path: Option<PathBuf>) -> Self {
        let binary = chrome_path
            .or_else(find_on_path)
            .unwrap_or_else(|| PathBuf::from(CHROME_CANDIDATES[0]));
        Self {
            binary,
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(format!("file://{}", input.display()))
            .kill_on_drop(true);
        cmd
    }
}

fn find_on_path() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| CHROME_CANDIDATES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render_html_to_pdf(
        &self,
        html: &str,
        cancel: &Cancellation,
    ) -> Result<Bytes, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let temp_dir = tempfile::tempdir()?;
        let input = temp_dir.path().join("resume.html");
        let output = temp_dir.path().join("resume.pdf");
        tokio::fs::write(&input, html).await?;

        let mut cmd = self.command(&input, &output);
        let run = cmd.output();
        let result = tokio::select! {
            r = tokio::time::timeout(self.timeout, run) => r,
            _ = cancel.cancelled() => return Err(RenderError::Cancelled),
        };
        let out = match result {
            Ok(out) => out.map_err(RenderError::Launch)?,
            Err(_) => {
                return Err(RenderError::Failed {
                    status: "timeout".to_string(),
                    stderr: format!("no output after {}s", self.timeout.as_secs()),
                })
            }
        };

        if !out.status.success() {
            return Err(RenderError::Failed {
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }

        let pdf = tokio::fs::read(&output).await?;
        debug!(bytes = pdf.len(), binary = %self.binary.display(), "chromium render finished");
        if !is_pdf(&pdf) {
            return Err(RenderError::InvalidOutput { len: pdf.len() });
        }
        Ok(Bytes::from(pdf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_wins() {
        let renderer = ChromiumRenderer::new(Some(PathBuf::from("/opt/chrome/chrome")));
        assert_eq!(renderer.binary(), Path::new("/opt/chrome/chrome"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let renderer = ChromiumRenderer::new(Some(PathBuf::from("/nonexistent/chromium-binary")));
        let err = renderer
            .render_html_to_pdf("<html></html>", &Cancellation::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Launch(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_cancelled_before_launch() {
        let renderer = ChromiumRenderer::new(Some(PathBuf::from("/nonexistent/chromium-binary")));
        let cancel = Cancellation::new();
        cancel.cancel();
        let err = renderer.render_html_to_pdf("<html></html>", &cancel).await.unwrap_err();
        assert!(matches!(err, RenderError::Cancelled));
    }
}
