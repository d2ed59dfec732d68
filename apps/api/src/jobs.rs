//! Background job queue. A fixed pool of workers pulls jobs from a bounded
//! channel; each job runs under its own cancellation token, tripped by the
//! per-job timeout.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::cancel::Cancellation;
use crate::models::job::{Job, JobStatus};
use crate::pipeline::Processor;
use crate::repository::RepoError;

const QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to persist job: {0}")]
    Repo(#[from] RepoError),

    #[error("job queue is closed")]
    Closed,
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    processor: Arc<Processor>,
}

impl JobQueue {
    /// Spawns `workers` worker tasks on the current runtime.
    pub fn start(processor: Arc<Processor>, workers: usize, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            let processor = processor.clone();
            tokio::spawn(
                async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(job) = next else {
                            break;
                        };
                        run_job(&processor, job, timeout).await;
                    }
                    info!("worker stopped");
                }
                .instrument(tracing::info_span!("worker", worker)),
            );
        }
        info!(workers, timeout_secs = timeout.as_secs(), "job queue started");
        Self { tx, processor }
    }

    /// Persists the job as pending and hands it to a worker.
    pub async fn submit(&self, mut job: Job) -> Result<Uuid, QueueError> {
        job.status = JobStatus::Pending;
        job.touch();
        self.processor.repo().save(&job).await?;
        let id = job.id;
        self.tx.send(job).await.map_err(|_| QueueError::Closed)?;
        info!(job_id = %id, "job queued");
        Ok(id)
    }
}

async fn run_job(processor: &Processor, mut job: Job, timeout: Duration) {
    let cancel = Cancellation::new();
    let trip = cancel.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        warn!(timeout_secs = timeout.as_secs(), "job timed out, cancelling");
        trip.cancel();
    });

    let result = processor.process(&mut job, &cancel).await;
    timer.abort();

    if let Err(e) = result {
        error!(job_id = %job.id, error = %e, "job failed");
        job.status = JobStatus::Failed;
        job.metadata.error = Some(e.to_string());
        job.touch();
        if let Err(e) = processor.repo().save(&job).await {
            error!(job_id = %job.id, error = %e, "failed to persist failed job");
        }
    }
}
