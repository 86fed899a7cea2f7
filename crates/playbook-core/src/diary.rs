//! Diary documents: the structured summary an external extractor produces
//! from a sanitized session transcript, persisted one JSON file per
//! processed session under `diary/`.

use crate::error::{PlaybookError, Result};
use crate::similarity;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diary {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accomplishments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_learnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_anchors: Vec<String>,
}

/// Session facts handed to the extractor alongside the sanitized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_path: String,
    pub agent: String,
}

/// One persisted diary file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryDocument {
    pub id: String,
    pub session_path: String,
    pub agent: String,
    pub created_at: DateTime<Utc>,
    pub diary: Diary,
}

/// External LLM contract for distilling a transcript into a diary.
pub trait DiaryExtractor {
    fn extract(&self, sanitized_text: &str, meta: &SessionMetadata) -> Result<Diary>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Diary filename derived from the session path so re-reflection overwrites
/// rather than duplicates.
pub fn diary_path(data_root: &Path, session_path: &str) -> PathBuf {
    let digest = similarity::hash_content(session_path);
    paths::diary_dir(data_root).join(format!("{}.json", &digest[..16]))
}

pub fn save_diary(data_root: &Path, doc: &DiaryDocument) -> Result<PathBuf> {
    let path = diary_path(data_root, &doc.session_path);
    io::atomic_write(&path, serde_json::to_string_pretty(doc)?.as_bytes())?;
    Ok(path)
}

pub fn load_diary(path: &Path) -> Result<DiaryDocument> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// All diaries, newest first. Unreadable files are skipped.
pub fn list_diaries(data_root: &Path) -> Result<Vec<DiaryDocument>> {
    let dir = paths::diary_dir(data_root);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut docs = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.path().extension().is_none_or(|e| e != "json") {
            continue;
        }
        match load_diary(&entry.path()) {
            Ok(doc) => docs.push(doc),
            Err(PlaybookError::Io(e)) => return Err(e.into()),
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), "skipping unreadable diary: {e}");
            }
        }
    }
    docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(docs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
