use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Output language passed to the content service when a job names none.
    pub default_language: String,
    pub ai_service_url: String,
    /// Job store. Jobs are kept in memory when unset.
    pub database_url: Option<String>,
    pub auth_database_url: Option<String>,
    pub jobs_database_url: Option<String>,
    pub posts_database_url: Option<String>,
    pub mgmt_database_url: Option<String>,
    pub artifact_root: PathBuf,
    pub chrome_path: Option<PathBuf>,
    pub port: u16,
    pub workers: usize,
    pub job_timeout: Duration,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            default_language: require_env("DEFAULT_LANGUAGE")?,
            ai_service_url: env_or("AI_SERVICE_URL", "http://ai-service:8000"),
            database_url: optional_env("DATABASE_URL"),
            auth_database_url: optional_env("AUTH_DATABASE_URL"),
            jobs_database_url: optional_env("JOBS_DATABASE_URL"),
            posts_database_url: optional_env("POSTS_DATABASE_URL"),
            mgmt_database_url: optional_env("MGMT_DATABASE_URL"),
            artifact_root: PathBuf::from(env_or("ARTIFACT_ROOT", "resume-data")),
            chrome_path: optional_env("CHROME_PATH").map(PathBuf::from),
            port: env_or("PORT", "3000")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            workers: env_or("WORKERS", "2")
                .parse::<usize>()
                .context("WORKERS must be a positive integer")?,
            job_timeout: Duration::from_secs(
                env_or("JOB_TIMEOUT_SECS", "300")
                    .parse::<u64>()
                    .context("JOB_TIMEOUT_SECS must be a number of seconds")?,
            ),
            rust_log: env_or("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    optional_env(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Unset and blank are the same thing.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}
