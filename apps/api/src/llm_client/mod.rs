/// Content Service Client: the single point of entry for calls to the
/// natural-language content service.
///
/// No other module may talk to the service directly. The pipeline depends on
/// the `ContentService` trait; `ContentClient` is the HTTP implementation.
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::models::resume::ResumeKey;
use crate::retry::RetryPolicy;

pub mod prompts;

use prompts::Task;

const CHAT_PATH: &str = "/v1/chat";
const AGENT: &str = "auto";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("content service returned unusable output: {0}")]
    Format(String),

    #[error("content service call cancelled")]
    Cancelled,

    #[error("content service failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl ContentError {
    /// Connection errors, timeouts, 429 and 5xx are worth another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            ContentError::Http(_) => true,
            ContentError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Per-job context threaded into every call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub language: String,
    pub cancel: Cancellation,
}

impl CallContext {
    pub fn new(language: impl Into<String>, cancel: Cancellation) -> Self {
        Self {
            language: language.into(),
            cancel,
        }
    }
}

/// One operation per section type. Outputs are raw JSON objects; the caller
/// validates and merges them.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Stage 1: `meta` and `snapshot`.
    async fn generate_meta(
        &self,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError>;

    /// Stage 2: `experience`.
    async fn generate_experience(
        &self,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError>;

    /// Stage 3: `projects`, `publications`, `certifications`.
    async fn generate_showcase(
        &self,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError>;

    /// Stage 4: `summary`, `extras`, meta polish.
    async fn generate_synthesis(
        &self,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError>;

    /// Narrow enrichment of the named keys only.
    async fn enrich_fields(
        &self,
        payload: &Value,
        fields: &[ResumeKey],
        ctx: &CallContext,
    ) -> Result<Value, ContentError>;

    /// Broad enrichment of the whole document.
    async fn enrich_full(&self, payload: &Value, ctx: &CallContext) -> Result<Value, ContentError>;

    /// Localized section headings for the given English defaults.
    async fn format_labels(
        &self,
        defaults: &BTreeMap<String, String>,
        ctx: &CallContext,
    ) -> Result<BTreeMap<String, String>, ContentError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    agent: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    agent: String,
    #[serde(default)]
    output: Value,
}

/// HTTP client for the content service. Cheap to clone; the underlying
/// connection pool is shared.
#[derive(Clone)]
pub struct ContentClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ContentClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ContentError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(&self, url: &str, input: &str) -> Result<Value, ContentError> {
        let response = self
            .client
            .post(url)
            .json(&ChatRequest { agent: AGENT, input })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ContentError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let chat: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ContentError::Format(format!("response envelope: {e}")))?;
        debug!(agent = %chat.agent, "content service responded");
        extract_json(&chat.output)
    }

    /// Sends one request with bounded retry. Every attempt and every backoff
    /// wait races the job's cancellation token.
    async fn chat(
        &self,
        task: Task<'_>,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError> {
        let url = format!("{}{CHAT_PATH}", self.base_url);
        let input = prompts::build(task, payload, &ctx.language);
        let what = format!("content service call ({task})");

        let mut attempt = 0;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(ContentError::Cancelled);
            }
            let outcome = tokio::select! {
                r = self.send_once(&url, &input) => r,
                _ = ctx.cancel.cancelled() => return Err(ContentError::Cancelled),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if !self.retry.has_next(attempt) {
                        warn!(
                            %task,
                            attempts = self.retry.attempts,
                            error = %e,
                            "content service retries exhausted"
                        );
                        return Err(ContentError::Exhausted {
                            attempts: self.retry.attempts,
                            last: e.to_string(),
                        });
                    }
                    warn!(%task, error = %e, "content service call failed");
                    self.retry
                        .backoff(attempt, &what, &ctx.cancel)
                        .await
                        .map_err(|_| ContentError::Cancelled)?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ContentService for ContentClient {
    async fn generate_meta(
        &self,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError> {
        self.chat(Task::Meta, payload, ctx).await
    }

    async fn generate_experience(
        &self,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError> {
        self.chat(Task::Experience, payload, ctx).await
    }

    async fn generate_showcase(
        &self,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError> {
        self.chat(Task::Showcase, payload, ctx).await
    }

    async fn generate_synthesis(
        &self,
        payload: &Value,
        ctx: &CallContext,
    ) -> Result<Value, ContentError> {
        self.chat(Task::Synthesis, payload, ctx).await
    }

    async fn enrich_fields(
        &self,
        payload: &Value,
        fields: &[ResumeKey],
        ctx: &CallContext,
    ) -> Result<Value, ContentError> {
        self.chat(Task::Fields(fields), payload, ctx).await
    }

    async fn enrich_full(&self, payload: &Value, ctx: &CallContext) -> Result<Value, ContentError> {
        self.chat(Task::Full, payload, ctx).await
    }

    async fn format_labels(
        &self,
        defaults: &BTreeMap<String, String>,
        ctx: &CallContext,
    ) -> Result<BTreeMap<String, String>, ContentError> {
        let payload = serde_json::to_value(defaults)
            .map_err(|e| ContentError::Format(e.to_string()))?;
        let output = self.chat(Task::Labels, &payload, ctx).await?;
        let labels: BTreeMap<String, String> = output
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| {
                        let s = v.as_str()?.trim();
                        (defaults.contains_key(k) && !s.is_empty())
                            .then(|| (k.clone(), s.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(labels)
    }
}

/// Parses the `output` field of a chat response into a JSON object.
///
/// Accepts an object directly, or a string holding JSON (optionally fenced or
/// surrounded by prose, in which case the span from the first `{` to the
/// last `}` is tried).
pub fn extract_json(output: &Value) -> Result<Value, ContentError> {
    match output {
        Value::Object(_) => Ok(output.clone()),
        Value::String(text) => parse_lenient(text),
        other => Err(ContentError::Format(format!(
            "expected a JSON object, got {}",
            kind_of(other)
        ))),
    }
}

fn parse_lenient(text: &str) -> Result<Value, ContentError> {
    let stripped = strip_json_fences(text);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(stripped) {
        return Ok(value);
    }
    let span = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(ContentError::Format("no JSON object in output".to_string())),
    };
    match serde_json::from_str::<Value>(span) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(ContentError::Format(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(ContentError::Format(e.to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));
    match inner {
        Some(stripped) => stripped
            .trim_start()
            .strip_suffix("```")
            .map(str::trim)
            .unwrap_or(stripped.trim_start()),
        None => text,
    }
}
