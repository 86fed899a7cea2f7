use crate::error::{PlaybookError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory constants
// ---------------------------------------------------------------------------

pub const PLAYBOOK_FILE: &str = "playbook.yaml";
pub const CONFIG_FILE: &str = "config.yaml";
pub const OUTCOME_LOG_FILE: &str = "outcomes.jsonl";
pub const TOXIC_LOG_FILE: &str = "toxic_bullets.log";

pub const DIARY_DIR: &str = "diary";
pub const REFLECTIONS_DIR: &str = "reflections";
pub const EMBEDDINGS_DIR: &str = "embeddings";
pub const EMBEDDINGS_FILE: &str = "bullets.json";

/// Per-repo overlay directory, owned by the external session-search tool.
pub const REPO_OVERLAY_DIR: &str = ".cass";
pub const REPO_TOXIC_FILE: &str = "toxic.log";

// ---------------------------------------------------------------------------
// Data root
// ---------------------------------------------------------------------------

/// Default per-user data root: `~/.cass/memory`.
pub fn default_data_root() -> Result<PathBuf> {
    let home = home::home_dir().ok_or(PlaybookError::HomeNotFound)?;
    Ok(home.join(".cass").join("memory"))
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn playbook_path(root: &Path) -> PathBuf {
    root.join(PLAYBOOK_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn outcome_log_path(root: &Path) -> PathBuf {
    root.join(OUTCOME_LOG_FILE)
}

pub fn toxic_log_path(root: &Path) -> PathBuf {
    root.join(TOXIC_LOG_FILE)
}

pub fn diary_dir(root: &Path) -> PathBuf {
    root.join(DIARY_DIR)
}

pub fn reflections_dir(root: &Path) -> PathBuf {
    root.join(REFLECTIONS_DIR)
}

pub fn embeddings_path(root: &Path) -> PathBuf {
    root.join(EMBEDDINGS_DIR).join(EMBEDDINGS_FILE)
}

pub fn repo_playbook_path(repo_root: &Path) -> PathBuf {
    repo_root.join(REPO_OVERLAY_DIR).join(PLAYBOOK_FILE)
}

pub fn repo_toxic_path(repo_root: &Path) -> PathBuf {
    repo_root.join(REPO_OVERLAY_DIR).join(REPO_TOXIC_FILE)
}

// ---------------------------------------------------------------------------
// Workspace scoping
// ---------------------------------------------------------------------------

/// Stable 8-hex-digit identifier for a workspace path, used to keep one
/// processed log per workspace: `reflections/ws-1a2b3c4d.processed.log`.
pub fn workspace_id(workspace: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workspace.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("ws-{}", &digest[..8])
}

/// Processed-log path for a workspace, or the global log when `workspace`
/// is `None`.
pub fn processed_log_path(root: &Path, workspace: Option<&str>) -> PathBuf {
    let stem = match workspace {
        Some(ws) => workspace_id(ws),
        None => "global".to_string(),
    };
    reflections_dir(root).join(format!("{stem}.processed.log"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
