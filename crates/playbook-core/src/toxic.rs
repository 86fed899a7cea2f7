//! Append-only log of forgotten content. A toxic entry permanently
//! suppresses any bullet whose content matches it, so reflection can never
//! resurrect a rule the user explicitly removed.
//!
//! One NDJSON file per scope: `toxic_bullets.log` at the data root, and
//! `.cass/toxic.log` in each repo overlay.

use crate::error::Result;
use crate::io;
use crate::similarity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Jaccard similarity above which a bullet is considered the same content
/// as a toxic entry even when the hashes differ.
pub const TOXIC_SIMILARITY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToxicEntry {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub forgotten_at: DateTime<Utc>,
}

/// Load all entries from a toxic log. Missing file yields an empty list;
/// malformed lines are skipped with a warning.
pub fn load_toxic_log(path: &Path) -> Result<Vec<ToxicEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ToxicEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    "skipping malformed toxic log line: {e}"
                );
            }
        }
    }
    Ok(entries)
}

/// Append one entry to a toxic log.
pub fn append_toxic(path: &Path, entry: &ToxicEntry) -> Result<()> {
    io::append_line(path, &serde_json::to_string(entry)?)
}

/// True when `content` matches any toxic entry, by exact normalized hash or
/// by Jaccard above the threshold.
pub fn is_suppressed(content: &str, entries: &[ToxicEntry]) -> bool {
    if entries.is_empty() {
        return false;
    }
    let hash = similarity::hash_content(content);
    entries.iter().any(|entry| {
        similarity::hash_content(&entry.content) == hash
            || similarity::jaccard(content, &entry.content) > TOXIC_SIMILARITY_THRESHOLD
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(content: &str) -> ToxicEntry {
        ToxicEntry {
            id: "t-1".to_string(),
            content: content.to_string(),
            reason: Some("caused repeated regressions".to_string()),
            forgotten_at: Utc::now(),
        }
    }

    #[test]
    fn append_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("toxic_bullets.log");
        append_toxic(&path, &entry("use global state everywhere")).unwrap();
        append_toxic(&path, &entry("skip code review for small changes")).unwrap();

        let entries = load_toxic_log(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "use global state everywhere");
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let entries = load_toxic_log(&dir.path().join("none.log")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("toxic_bullets.log");
        append_toxic(&path, &entry("first")).unwrap();
        io::append_line(&path, "not json at all").unwrap();
        append_toxic(&path, &entry("second")).unwrap();

        let entries = load_toxic_log(&path).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn suppression_by_normalized_hash() {
        let entries = vec![entry("Use global state everywhere")];
        assert!(is_suppressed("use global state EVERYWHERE", &entries));
    }

    #[test]
    fn suppression_by_similarity() {
        let entries = vec![entry("always force push directly to the main branch")];
        assert!(is_suppressed(
            "always force push directly to main branch",
            &entries
        ));
    }

    #[test]
    fn unrelated_content_not_suppressed() {
        let entries = vec![entry("use global state everywhere")];
        assert!(!is_suppressed("write integration tests for parsers", &entries));
    }
}
