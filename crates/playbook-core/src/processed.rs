//! Crash-safe record of which sessions have already been through
//! reflection, one tab-separated file per scope:
//!
//!   # id<TAB>sessionPath<TAB>processedAt<TAB>deltasProposed<TAB>deltasApplied
//!   d-3f2a1b<TAB>/home/dev/.claude/s.jsonl<TAB>2026-07-30T10:00:00Z<TAB>4<TAB>3
//!
//! Membership checks are O(1) via an in-memory set keyed by session path.

use crate::error::Result;
use crate::io;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const HEADER: &str = "# id\tsessionPath\tprocessedAt\tdeltasProposed\tdeltasApplied";

#[derive(Debug, Clone)]
pub struct ProcessedEntry {
    pub id: Option<String>,
    pub session_path: String,
    pub processed_at: DateTime<Utc>,
    pub deltas_proposed: usize,
    pub deltas_applied: usize,
}

#[derive(Debug)]
pub struct ProcessedLog {
    path: PathBuf,
    entries: Vec<ProcessedEntry>,
    seen: HashSet<String>,
}

impl ProcessedLog {
    /// Load the log, tolerating malformed lines (skip and continue).
    pub fn load(path: &Path) -> Result<Self> {
        let mut log = Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            seen: HashSet::new(),
        };
        if !path.exists() {
            return Ok(log);
        }
        let content = std::fs::read_to_string(path)?;
        for (lineno, line) in content.lines().enumerate() {
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some(entry) => {
                    log.seen.insert(entry.session_path.clone());
                    log.entries.push(entry);
                }
                None => {
                    tracing::warn!(
                        path = %path.display(),
                        line = lineno + 1,
                        "skipping malformed processed-log line"
                    );
                }
            }
        }
        Ok(log)
    }

    pub fn contains(&self, session_path: &str) -> bool {
        self.seen.contains(session_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(&mut self, entry: ProcessedEntry) {
        self.seen.insert(entry.session_path.clone());
        self.entries.push(entry);
    }

    /// Rewrite the whole file atomically. Callers hold the lock when other
    /// processes may be reflecting concurrently.
    pub fn save(&self) -> Result<()> {
        let mut out = String::from(HEADER);
        out.push('\n');
        for entry in &self.entries {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                entry.id.as_deref().unwrap_or("-"),
                entry.session_path,
                entry.processed_at.to_rfc3339(),
                entry.deltas_proposed,
                entry.deltas_applied,
            ));
        }
        io::atomic_write(&self.path, out.as_bytes())
    }
}

fn parse_line(line: &str) -> Option<ProcessedEntry> {
    let mut fields = line.split('\t');
    let id = fields.next()?;
    let session_path = fields.next()?;
    let processed_at = DateTime::parse_from_rfc3339(fields.next()?)
        .ok()?
        .with_timezone(&Utc);
    let deltas_proposed = fields.next()?.parse().ok()?;
    let deltas_applied = fields.next()?.parse().ok()?;
    Some(ProcessedEntry {
        id: (id != "-").then(|| id.to_string()),
        session_path: session_path.to_string(),
        processed_at,
        deltas_proposed,
        deltas_applied,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
