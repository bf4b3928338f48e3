use thiserror::Error;

use crate::archiver::ArchiveError;
use crate::batch::BatchError;
use crate::object::ObjectId;
use crate::state_machine::Stage;
use crate::store::{BlobPath, StoreError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Precondition(#[from] Precondition),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{stage} stage failed for {object}")]
    StageBody {
        stage: Stage,
        object: ObjectId,
        #[source]
        source: StageBodyError,
    },

    #[error("stage `{0}` is terminal and has no work to run")]
    TerminalStage(Stage),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("invalid object URL `{0}`, expected s3://<container>/<path>")]
    InvalidObjectUrl(String),
}

/// A stage was invoked out of order or on an object that already advanced.
/// Nothing is mutated when one of these is returned.
#[derive(Debug, Error)]
pub enum Precondition {
    #[error("missing inbox marker {0}")]
    MissingInbox(BlobPath),

    #[error("outbox marker already present at {0}")]
    OutboxPresent(BlobPath),
}

/// Failure inside a stage body; markers stay in their pre-stage state.
#[derive(Debug, Error)]
pub enum StageBodyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
