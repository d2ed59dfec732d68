use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::Job;
use crate::repository::JobsRepo;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub user_id: String,
    #[serde(default)]
    pub job_application_id: Option<String>,
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Raw user overrides.
    #[serde(default)]
    pub profile: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobResponse {
    pub job_id: Uuid,
    pub status: &'static str,
}

/// POST /jobs/start
pub async fn handle_start_job(
    State(state): State<AppState>,
    Json(req): Json<StartJobRequest>,
) -> Result<(StatusCode, Json<StartJobResponse>), AppError> {
    let user_id = Uuid::parse_str(req.user_id.trim())
        .map_err(|_| AppError::Validation(format!("userId is not a UUID: {}", req.user_id)))?;
    let language = req
        .language
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| state.default_language.clone());

    let mut job = Job::new(user_id, language);
    job.job_description = req.job_description.unwrap_or_default();
    job.overrides = req.profile.unwrap_or(Value::Null);
    job.metadata.job_application_id = req.job_application_id.filter(|id| !id.trim().is_empty());

    let job_id = state.queue.submit(job).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            job_id,
            status: "started",
        }),
    ))
}

/// GET /jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    state
        .repo
        .find(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("job {id}")))
}
