pub mod health;
pub mod jobs;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/jobs/start", post(jobs::handle_start_job))
        .route("/jobs/:id", get(jobs::handle_get_job))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobQueue;
    use crate::pipeline::artifacts::ArtifactStore;
    use crate::pipeline::Processor;
    use crate::repository::{JobsRepo, MemoryJobsRepo};
    use crate::retry::RetryPolicy;
    use crate::testing::{fixture_aggregate, ScriptedContent, StubAggregator, StubRenderer};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(dir: &std::path::Path) -> (Router, Arc<MemoryJobsRepo>) {
        let repo = Arc::new(MemoryJobsRepo::new());
        let processor = Processor::new(
            Arc::new(ScriptedContent::new()),
            Arc::new(StubAggregator::with(fixture_aggregate())),
            repo.clone(),
            Arc::new(StubRenderer::succeeding()),
            ArtifactStore::new(dir),
        )
        .unwrap()
        .with_render_retry(RetryPolicy::new(1, Duration::from_millis(1)));
        let state = AppState {
            repo: repo.clone(),
            queue: JobQueue::start(Arc::new(processor), 1, Duration::from_secs(60)),
            default_language: "english".into(),
        };
        (build_router(state), repo)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_start(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/jobs/start")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_start_job_is_accepted_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (app, repo) = app(dir.path());
        let user = Uuid::new_v4();
        let response = app
            .oneshot(post_start(json!({
                "userId": user.to_string(),
                "jobApplicationId": "app-1",
                "language": "german",
                "profile": {"extras": "Open-source contributor"}
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "started");

        let id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();
        let job = repo.find(id).await.unwrap().unwrap();
        assert_eq!(job.user_id, user);
        assert_eq!(job.language, "german");
        assert_eq!(job.metadata.job_application_id.as_deref(), Some("app-1"));
        assert_eq!(job.overrides, json!({"extras": "Open-source contributor"}));
    }

    #[tokio::test]
    async fn test_start_job_rejects_bad_user_id() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let response = app.oneshot(post_start(json!({"userId": "nope"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_get_job() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let response = app
            .clone()
            .oneshot(post_start(json!({"userId": Uuid::new_v4().to_string()})))
            .await
            .unwrap();
        let id = body_json(response).await["jobId"].as_str().unwrap().to_string();

        let response = app
            .oneshot(Request::get(format!("/jobs/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job = body_json(response).await;
        assert_eq!(job["id"], id.as_str());
        assert_eq!(job["language"], "english");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let uri = format!("/jobs/{}", Uuid::new_v4());
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
    }
}
