use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("bullet not found: {0}")]
    BulletNotFound(String),

    #[error("bullet '{0}' is pinned: {1}")]
    PinnedBullet(String, String),

    #[error("invalid scope '{0}': expected global, workspace, language, framework, or task")]
    InvalidScope(String),

    #[error("lock timeout: could not acquire {}", path.display())]
    LockTimeout { path: PathBuf },

    #[error("history tool unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("history search failed: {0}")]
    History(String),

    #[error("validator unavailable: {0}")]
    ValidatorUnavailable(String),

    #[error("diary extraction failed: {0}")]
    Extraction(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlaybookError>;
