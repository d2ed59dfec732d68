mod aggregate;
mod cancel;
mod config;
mod db;
mod errors;
mod jobs;
mod llm_client;
mod models;
mod overrides;
mod pipeline;
mod render;
mod repository;
mod retry;
mod routes;
mod schema;
mod state;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::aggregate::PgAggregator;
use crate::config::Config;
use crate::db::{create_pool, source_pool};
use crate::jobs::JobQueue;
use crate::llm_client::ContentClient;
use crate::pipeline::artifacts::ArtifactStore;
use crate::pipeline::Processor;
use crate::render::pdf::ChromiumRenderer;
use crate::repository::{JobsRepo, MemoryJobsRepo, PgJobsRepo};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume pipeline v{}", env!("CARGO_PKG_VERSION"));

    // Job store: Postgres when configured, in-memory otherwise
    let repo: Arc<dyn JobsRepo> = match &config.database_url {
        Some(url) => {
            let repo = PgJobsRepo::new(create_pool(url).await?);
            repo.ensure_schema().await?;
            Arc::new(repo)
        }
        None => {
            info!("DATABASE_URL not set, keeping jobs in memory");
            Arc::new(MemoryJobsRepo::new())
        }
    };

    let aggregator = PgAggregator {
        auth: source_pool("auth", config.auth_database_url.as_deref()),
        jobs: source_pool("jobs", config.jobs_database_url.as_deref()),
        posts: source_pool("posts", config.posts_database_url.as_deref()),
        mgmt: source_pool("mgmt", config.mgmt_database_url.as_deref()),
    };

    let content = ContentClient::new(config.ai_service_url.clone())?;
    info!("Content service client initialized ({})", config.ai_service_url);

    let renderer = ChromiumRenderer::new(config.chrome_path.clone());
    info!("PDF renderer: {}", renderer.binary().display());

    let processor = Processor::new(
        Arc::new(content),
        Arc::new(aggregator),
        repo.clone(),
        Arc::new(renderer),
        ArtifactStore::new(config.artifact_root.clone()),
    )?;
    let queue = JobQueue::start(Arc::new(processor), config.workers, config.job_timeout);

    let state = AppState {
        repo,
        queue,
        default_language: config.default_language.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
