use std::future::Future;

use chrono::Utc;
use tracing::info;

use super::stage::{Layout, Stage};
use crate::error::{PipelineError, Precondition, StageBodyError};
use crate::object::ObjectId;
use crate::store::{BlobPath, BlobStore};

/// Everything a stage body needs to know about the object it works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePaths {
    pub id: ObjectId,
    pub inbox: BlobPath,
    pub outbox: BlobPath,
    pub manifest: BlobPath,
    pub package: BlobPath,
}

/// Runs stage bodies inside the shared marker protocol.
///
/// The marker namespace is the only state. A stage may run when its inbox
/// marker exists and its outbox marker does not; on success the inbox is
/// deleted and then the outbox is written with the completion time.
pub struct Pipeline<S> {
    store: S,
    layout: Layout,
}

impl<S: BlobStore> Pipeline<S> {
    pub fn new(store: S, layout: Layout) -> Self {
        Self { store, layout }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn paths(&self, stage: Stage, id: &ObjectId) -> Result<StagePaths, PipelineError> {
        let next = stage.next().ok_or(PipelineError::TerminalStage(stage))?;
        Ok(StagePaths {
            id: id.clone(),
            inbox: self.layout.marker(stage, id),
            outbox: self.layout.marker(next, id),
            manifest: self.layout.manifest(id),
            package: self.layout.package(id),
        })
    }

    /// Runs `body` for `id` at `stage` and advances the object on success.
    ///
    /// Re-running an object that already advanced is a precondition error,
    /// never a silent no-op. When `body` fails the markers are left exactly
    /// as they were, so the same command can simply be run again.
    ///
    /// The inbox is removed before the outbox is written: a crash between the
    /// two leaves the object in neither namespace rather than in both.
    pub async fn run_stage<F, Fut>(
        &self,
        stage: Stage,
        id: &ObjectId,
        body: F,
    ) -> Result<StagePaths, PipelineError>
    where
        F: FnOnce(StagePaths) -> Fut,
        Fut: Future<Output = Result<(), StageBodyError>>,
    {
        let paths = self.paths(stage, id)?;

        if !self.store.exists(&paths.inbox).await? {
            return Err(Precondition::MissingInbox(paths.inbox).into());
        }
        if self.store.exists(&paths.outbox).await? {
            return Err(Precondition::OutboxPresent(paths.outbox).into());
        }

        info!(
            %stage,
            object = %id.url(),
            inbox = %paths.inbox,
            outbox = %paths.outbox,
            manifest = %paths.manifest,
            package = %paths.package,
            "running stage"
        );

        body(paths.clone())
            .await
            .map_err(|source| PipelineError::StageBody {
                stage,
                object: id.clone(),
                source,
            })?;

        info!(removing = %paths.inbox, creating = %paths.outbox, "advancing marker");
        self.store.delete(&paths.inbox).await?;
        let completed_at = Utc::now().timestamp();
        self.store
            .write(&paths.outbox, completed_at.to_string().as_bytes())
            .await?;

        Ok(paths)
    }
}
