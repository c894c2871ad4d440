use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackError>;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] rlm_store::StoreError),

    /// A required upstream artifact is absent.
    #[error("missing input: {}", path.display())]
    MissingArtifact { path: PathBuf },

    /// Budget enforcement failed even after every trim step ran.
    #[error("pack budget exceeded: {}", errors.join("; "))]
    BudgetExceeded { errors: Vec<String> },
}
