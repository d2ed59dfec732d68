//! Source-data aggregation.
//!
//! `AggregateResult` is an opaque key -> JSON bag gathered from the profile,
//! jobs, posts and management stores. Its shape is not trusted: every
//! accessor checks existence and type on each read.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("aggregation source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AggregateResult(Map<String, Value>);

impl AggregateResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-object input yields an empty result.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rows stored under `key`, or an empty slice when absent or not an array.
    pub fn rows(&self, key: &str) -> &[Value] {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Object rows stored under `key`; non-object rows are skipped.
    pub fn objects<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
        self.rows(key).iter().filter_map(Value::as_object)
    }

    /// The first aggregated profile, when it is an object.
    pub fn first_profile(&self) -> Option<&Map<String, Value>> {
        self.rows("profiles").first().and_then(Value::as_object)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

#[async_trait]
pub trait Aggregator: Send + Sync {
    async fn aggregate(&self, user_id: Uuid) -> Result<AggregateResult, AggregateError>;

    /// A single job-application row, if the jobs store has it.
    async fn job_application(&self, id: &str) -> Result<Option<Value>, AggregateError>;
}

struct Source {
    key: &'static str,
    sql: &'static str,
    /// `true` for single-row lookups, `false` for `json_agg` lists.
    single: bool,
}

const AUTH_SOURCES: &[Source] = &[
    Source {
        key: "user",
        sql: "SELECT to_jsonb(u) FROM users u WHERE u.id::text = $1 LIMIT 1",
        single: true,
    },
    Source {
        key: "profiles",
        sql: "SELECT coalesce(json_agg(row_to_json(p)), '[]') FROM profiles p WHERE p.user_id::text = $1",
        single: false,
    },
];

const JOBS_SOURCES: &[Source] = &[
    Source {
        key: "resumes",
        sql: "SELECT coalesce(json_agg(row_to_json(r)), '[]') FROM resumes r WHERE r.user_id::text = $1",
        single: false,
    },
    Source {
        key: "job_applications",
        sql: "SELECT coalesce(json_agg(row_to_json(j)), '[]') FROM job_applications j WHERE j.user_id::text = $1",
        single: false,
    },
];

const POSTS_SOURCES: &[Source] = &[
    Source {
        key: "projects",
        sql: "SELECT coalesce(json_agg(row_to_json(p)), '[]') FROM projects p WHERE p.owner_id::text = $1 OR p.user_id::text = $1",
        single: false,
    },
    Source {
        key: "case_studies",
        sql: "SELECT coalesce(json_agg(row_to_json(c)), '[]') FROM case_studies c WHERE c.author_id::text = $1 OR c.user_id::text = $1",
        single: false,
    },
    Source {
        key: "publications",
        sql: "SELECT coalesce(json_agg(row_to_json(pub)), '[]') FROM publications pub WHERE pub.user_id::text = $1",
        single: false,
    },
    Source {
        key: "impact_metrics",
        sql: "SELECT coalesce(json_agg(row_to_json(m)), '[]') FROM impact_metrics m WHERE m.user_id::text = $1",
        single: false,
    },
];

const MGMT_SOURCES: &[Source] = &[
    Source {
        key: "experiences",
        sql: "SELECT coalesce(json_agg(row_to_json(e)), '[]') FROM experiences e WHERE e.user_id::text = $1",
        single: false,
    },
    Source {
        key: "testimonials",
        sql: "SELECT coalesce(json_agg(row_to_json(t)), '[]') FROM testimonials t WHERE t.user_id::text = $1 OR t.author_id::text = $1",
        single: false,
    },
    Source {
        key: "project_technologies",
        sql: "SELECT coalesce(json_agg(row_to_json(pt)), '[]') FROM project_technologies pt WHERE pt.user_id::text = $1 OR pt.project_owner_id::text = $1",
        single: false,
    },
    Source {
        key: "projects",
        sql: "SELECT coalesce(json_agg(row_to_json(cs)), '[]') FROM project_case_studies cs WHERE cs.project_id IN (SELECT id FROM projects WHERE user_id::text = $1)",
        single: false,
    },
    Source {
        key: "certifications",
        sql: "SELECT coalesce(json_agg(row_to_json(c)), '[]') FROM certifications c WHERE c.user_id::text = $1",
        single: false,
    },
    Source {
        key: "extras",
        sql: "SELECT coalesce(json_agg(row_to_json(e)), '[]') FROM extras e WHERE e.user_id::text = $1",
        single: false,
    },
];

/// Best-effort aggregation over up to four optional Postgres pools. A missing
/// pool, table or column skips that source; the rest is still returned.
#[derive(Clone, Default)]
pub struct PgAggregator {
    pub auth: Option<PgPool>,
    pub jobs: Option<PgPool>,
    pub posts: Option<PgPool>,
    pub mgmt: Option<PgPool>,
}

impl PgAggregator {
    async fn collect(pool: &PgPool, sources: &[Source], user_id: &str, out: &mut AggregateResult) {
        for source in sources {
            let fetched = if source.single {
                sqlx::query_scalar::<_, Value>(source.sql)
                    .bind(user_id)
                    .fetch_optional(pool)
                    .await
            } else {
                sqlx::query_scalar::<_, Value>(source.sql)
                    .bind(user_id)
                    .fetch_one(pool)
                    .await
                    .map(Some)
            };
            match fetched {
                Ok(Some(value)) => merge_source(out, source.key, value),
                Ok(None) => {}
                Err(e) => debug!(source = source.key, error = %e, "aggregation source skipped"),
            }
        }
    }
}

/// Later sources only replace an earlier one when they actually have rows.
fn merge_source(out: &mut AggregateResult, key: &str, value: Value) {
    let empty = value.as_array().map(Vec::is_empty).unwrap_or(false);
    if empty && out.get(key).is_some() {
        return;
    }
    out.insert(key, value);
}

/// Profiles sometimes store `social_links` as JSON text; turn it into an object.
pub fn normalize_social_links(profiles: &mut Value) {
    let Some(rows) = profiles.as_array_mut() else {
        return;
    };
    for profile in rows.iter_mut().filter_map(Value::as_object_mut) {
        let parsed = match profile.get("social_links") {
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(obj @ Value::Object(_)) => obj,
                _ => continue,
            },
            _ => continue,
        };
        profile.insert("social_links".to_string(), parsed);
    }
}

#[async_trait]
impl Aggregator for PgAggregator {
    async fn aggregate(&self, user_id: Uuid) -> Result<AggregateResult, AggregateError> {
        let user_id = user_id.to_string();
        let mut out = AggregateResult::new();

        let stores = [
            (&self.auth, AUTH_SOURCES),
            (&self.jobs, JOBS_SOURCES),
            (&self.posts, POSTS_SOURCES),
            (&self.mgmt, MGMT_SOURCES),
        ];
        for (pool, sources) in stores {
            if let Some(pool) = pool {
                Self::collect(pool, sources, &user_id, &mut out).await;
            }
        }

        if let Some(profiles) = out.0.get_mut("profiles") {
            normalize_social_links(profiles);
        }

        info!(user_id = %user_id, keys = out.0.len(), "aggregation complete");
        Ok(out)
    }

    async fn job_application(&self, id: &str) -> Result<Option<Value>, AggregateError> {
        let Some(pool) = &self.jobs else {
            return Ok(None);
        };
        let row = sqlx::query_scalar::<_, Value>(
            "SELECT to_jsonb(j) FROM job_applications j WHERE j.id::text = $1 LIMIT 1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }
}
