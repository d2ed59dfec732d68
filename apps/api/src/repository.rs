//! Job persistence. `save` is an idempotent upsert keyed by job id.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{Job, JobMetadata, JobStatus};
use crate::models::resume::ResumeDocument;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored job {id} is corrupt: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn save(&self, job: &Job) -> Result<(), RepoError>;
    async fn find(&self, id: Uuid) -> Result<Option<Job>, RepoError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    user_id: Uuid,
    job_description: String,
    language: String,
    status: String,
    overrides: Value,
    profile: Option<Value>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = RepoError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |reason: String| RepoError::Corrupt { id, reason };
        let profile = row
            .profile
            .map(serde_json::from_value::<ResumeDocument>)
            .transpose()
            .map_err(|e| corrupt(format!("profile: {e}")))?;
        let metadata: JobMetadata = serde_json::from_value(row.metadata)
            .map_err(|e| corrupt(format!("metadata: {e}")))?;
        Ok(Job {
            id: row.id,
            user_id: row.user_id,
            job_description: row.job_description,
            language: row.language,
            status: JobStatus::parse(&row.status),
            overrides: row.overrides,
            profile,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgJobsRepo {
    pool: PgPool,
}

impl PgJobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the jobs table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resume_jobs (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                job_description TEXT NOT NULL DEFAULT '',
                language TEXT NOT NULL,
                status TEXT NOT NULL,
                overrides JSONB NOT NULL DEFAULT '{}'::jsonb,
                profile JSONB,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobsRepo for PgJobsRepo {
    async fn save(&self, job: &Job) -> Result<(), RepoError> {
        let profile = job
            .profile
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| RepoError::Corrupt {
                id: job.id,
                reason: format!("profile: {e}"),
            })?;
        let metadata = serde_json::to_value(&job.metadata).map_err(|e| RepoError::Corrupt {
            id: job.id,
            reason: format!("metadata: {e}"),
        })?;

        sqlx::query(
            r#"
            INSERT INTO resume_jobs
                (id, user_id, job_description, language, status, overrides, profile, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                job_description = EXCLUDED.job_description,
                language = EXCLUDED.language,
                status = EXCLUDED.status,
                overrides = EXCLUDED.overrides,
                profile = EXCLUDED.profile,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.id)
        .bind(job.user_id)
        .bind(&job.job_description)
        .bind(&job.language)
        .bind(job.status.as_str())
        .bind(&job.overrides)
        .bind(profile)
        .bind(metadata)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Job>, RepoError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, job_description, language, status, overrides, profile, metadata,
                   created_at, updated_at
            FROM resume_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

/// Used when no `DATABASE_URL` is configured, and in tests.
#[derive(Default)]
pub struct MemoryJobsRepo {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobsRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobsRepo for MemoryJobsRepo {
    async fn save(&self, job: &Job) -> Result<(), RepoError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Job>, RepoError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }
}
