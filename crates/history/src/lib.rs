/// Snapshot-based undo/redo history for a collaboratively edited project
use thiserror::Error;

mod config;
pub use config::*;

mod snapshot;
pub use snapshot::*;

mod reconcile;
pub use reconcile::*;

mod engine;
pub use engine::*;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("restore failed: {0}")]
    Restore(#[from] project::ProjectError),

    #[error("a restore is already in progress")]
    RestoreInProgress,

    #[error("history empty: {0}")]
    HistoryEmpty(&'static str),

    #[error("no redo image recorded for entry {0}")]
    MissingRedoImage(usize),
}

pub type Result<T> = std::result::Result<T, HistoryError>;
