use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::AcquireError;
use tokio::task::JoinError;

use super::Record;
use super::store::StoreMode;

/// Errors raised by a single partition operation of a `PartitionedStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("partition {index} is unavailable: cannot open {path:?}: {reason}")]
    Unavailable {
        index: usize,
        path: PathBuf,
        reason: String,
    },

    #[error("partition {index} was closed")]
    Closed { index: usize },

    #[error("partition {index} is not open for {wanted}")]
    WrongMode { index: usize, wanted: StoreMode },

    #[error("partition index {index} out of range, store has {len} partitions")]
    OutOfRange { index: usize, len: usize },

    #[error("record {record:?} cannot be stored: {reason}")]
    InvalidRecord { record: Record, reason: &'static str },

    #[error("malformed line in partition {index}: {line:?}")]
    Malformed { index: usize, line: String },

    #[error("I/O error on partition {index}: {source}")]
    Io {
        index: usize,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Map,
    Combine,
    Shuffle,
    Reduce,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Map => "map",
            Stage::Combine => "combine",
            Stage::Shuffle => "shuffle",
            Stage::Reduce => "reduce",
        })
    }
}

/// Failure of one task within a pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot read input: {0}")]
    Input(#[source] std::io::Error),

    #[error("{stage} callback failed: {source:#}")]
    Callback {
        stage: Stage,
        source: anyhow::Error,
    },

    #[error("worker task did not complete: {0}")]
    Join(#[from] JoinError),

    #[error("worker pool closed: {0}")]
    PoolClosed(#[from] AcquireError),
}

impl StageError {
    pub fn callback(stage: Stage, source: anyhow::Error) -> Self {
        StageError::Callback { stage, source }
    }

    /// Storage and input failures; the only kind `FailurePolicy::Tolerate`
    /// may swallow.
    pub fn is_io_failure(&self) -> bool {
        matches!(self, StageError::Store(_) | StageError::Input(_))
    }
}
