//! Turns pending markers into batch jobs, skipping work that is already
//! queued or still in quarantine.
//!
//! Deduplication is best effort: the set of in-flight job names is a snapshot
//! taken at the start of a run, so two concurrent runs can still submit the
//! same job.

use std::collections::HashSet;
use std::pin::pin;

use chrono::Utc;
use futures::TryStreamExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::batch::{BatchError, BatchService, JobStatus, SubmitJobRequest};
use crate::error::PipelineError;
use crate::object::ObjectId;
use crate::scanner::scan_stage;
use crate::state_machine::{Pipeline, Stage};
use crate::store::{BlobPath, BlobStore, StoreError};

/// A per-item dispatch failure. Other items in the same run still proceed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job submission failed: {0}")]
    Submit(#[from] BatchError),

    #[error("could not read marker: {0}")]
    Store(#[from] StoreError),

    #[error("marker {path} does not hold a timestamp: {content:?}")]
    InvalidTimestamp { path: BlobPath, content: String },
}

#[derive(Debug)]
pub enum Outcome {
    Dispatched {
        name: String,
        queue: String,
        job_id: String,
    },
    AlreadyQueued {
        name: String,
    },
    /// Marker younger than the stage's quarantine window.
    TooRecent {
        age_secs: i64,
    },
    /// Marker vanished between listing and reading; another run advanced it.
    Gone,
    Failed(DispatchError),
}

#[derive(Debug)]
pub struct ItemReport {
    pub object: ObjectId,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub struct DispatchReport {
    pub stage: Stage,
    pub queue: String,
    pub items: Vec<ItemReport>,
}

impl DispatchReport {
    pub fn dispatched(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Dispatched { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.items.len() - self.dispatched() - self.failed()
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.outcome)).count()
    }
}

/// Derives the batch job name for running `stage` on `id`.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`, so distinct
/// identities can collide (`a/b` and `a.b`); the name is only used to spot
/// already-queued work.
pub fn job_name(stage: Stage, id: &ObjectId) -> String {
    format!("{stage}-{id}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct Dispatcher<S, B> {
    pipeline: Pipeline<S>,
    batch: B,
    job_program: String,
    now: Option<i64>,
}

impl<S: BlobStore, B: BatchService> Dispatcher<S, B> {
    pub fn new(pipeline: Pipeline<S>, batch: B, job_program: impl Into<String>) -> Self {
        Self {
            pipeline,
            batch,
            job_program: job_program.into(),
            now: None,
        }
    }

    /// Pins the clock used for quarantine checks (unix seconds).
    #[cfg(test)]
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    /// Submits a job for each eligible object waiting in `stage`.
    ///
    /// `limit` caps the number of submission attempts; `0` means no cap.
    /// Items skipped as queued, too recent or gone do not count against it.
    pub async fn dispatch(
        &self,
        stage: Stage,
        queue: &str,
        job_definition: &str,
        limit: usize,
    ) -> Result<DispatchReport, PipelineError> {
        if !Stage::RUNNABLE.contains(&stage) {
            return Err(PipelineError::TerminalStage(stage));
        }

        let mut queued: HashSet<String> = self
            .batch
            .list_job_names(queue, &JobStatus::ACTIVE)
            .await?
            .into_iter()
            .collect();
        info!(%stage, queue, in_flight = queued.len(), "fetched in-flight jobs");

        let now = self.now.unwrap_or_else(|| Utc::now().timestamp());
        let mut report = DispatchReport {
            stage,
            queue: queue.to_string(),
            items: Vec::new(),
        };
        let mut attempts = 0;

        let mut pending = pin!(scan_stage(&self.pipeline, stage));
        while let Some(id) = pending.try_next().await? {
            let outcome = self
                .consider(stage, &id, queue, job_definition, now, &mut queued)
                .await;
            let attempted = matches!(
                outcome,
                Outcome::Dispatched { .. } | Outcome::Failed(DispatchError::Submit(_))
            );
            report.items.push(ItemReport {
                object: id,
                outcome,
            });
            if attempted {
                attempts += 1;
                if limit != 0 && attempts >= limit {
                    info!(limit, "dispatch limit reached");
                    break;
                }
            }
        }

        info!(
            %stage,
            dispatched = report.dispatched(),
            skipped = report.skipped(),
            failed = report.failed(),
            "dispatch finished"
        );
        Ok(report)
    }

    async fn consider(
        &self,
        stage: Stage,
        id: &ObjectId,
        queue: &str,
        job_definition: &str,
        now: i64,
        queued: &mut HashSet<String>,
    ) -> Outcome {
        if let Some(window) = stage.quarantine() {
            let marker = self.pipeline.layout().marker(stage, id);
            match self.marker_age(&marker, now).await {
                Ok(age_secs) if age_secs < window.as_secs() as i64 => {
                    info!(object = %id.url(), age_secs, "skipping, marker too new");
                    return Outcome::TooRecent { age_secs };
                }
                Ok(_) => {}
                Err(DispatchError::Store(err)) if err.is_not_found() => {
                    info!(object = %id.url(), "skipping, marker no longer present");
                    return Outcome::Gone;
                }
                Err(err) => {
                    warn!(object = %id.url(), error = %err, "cannot check marker age");
                    return Outcome::Failed(err);
                }
            }
        }

        let name = job_name(stage, id);
        if queued.contains(&name) {
            info!(object = %id.url(), job = %name, "skipping, already queued");
            return Outcome::AlreadyQueued { name };
        }

        let request = SubmitJobRequest::new(
            name.as_str(),
            queue,
            job_definition,
            vec![self.job_program.clone(), stage.to_string(), id.url()],
        );
        match self.batch.submit_job(&request).await {
            Ok(resp) => {
                info!(object = %id.url(), job = %name, queue, job_id = %resp.job_id, "job queued");
                queued.insert(name.clone());
                Outcome::Dispatched {
                    name,
                    queue: queue.to_string(),
                    job_id: resp.job_id,
                }
            }
            Err(err) => {
                warn!(object = %id.url(), job = %name, error = %err, "job submission failed");
                Outcome::Failed(DispatchError::Submit(err))
            }
        }
    }

    async fn marker_age(&self, marker: &BlobPath, now: i64) -> Result<i64, DispatchError> {
        let bytes = self.pipeline.store().read(marker).await?;
        let content = String::from_utf8_lossy(&bytes);
        let timestamp: i64 =
            content
                .trim()
                .parse()
                .map_err(|_| DispatchError::InvalidTimestamp {
                    path: marker.clone(),
                    content: content.to_string(),
                })?;
        Ok(now - timestamp)
    }
}
