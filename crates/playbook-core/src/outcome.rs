//! Outcome records: the observed result of using one or more rules in a
//! session, appended to `outcomes.jsonl` and translated into weighted
//! feedback events on the cited bullets.

use crate::bullet::{FeedbackDetails, FeedbackType};
use crate::error::Result;
use crate::lock::with_lock;
use crate::playbook::{self, Playbook};
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const FAST_THRESHOLD_SECONDS: u64 = 600;
const SLOW_THRESHOLD_SECONDS: u64 = 3600;

const MIN_EVENT_WEIGHT: f64 = 0.1;
const MAX_EVENT_WEIGHT: f64 = 2.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Mixed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failure => "failure",
            OutcomeStatus::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub session_id: String,
    pub outcome: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    #[serde(default)]
    pub had_retries: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    pub recorded_at: DateTime<Utc>,
    /// Session transcript path, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

pub fn append_outcome(data_root: &Path, record: &OutcomeRecord) -> Result<()> {
    io::append_line(
        &paths::outcome_log_path(data_root),
        &serde_json::to_string(record)?,
    )
}

/// Read all well-formed records; malformed lines are skipped.
pub fn load_outcomes(data_root: &Path) -> Result<Vec<OutcomeRecord>> {
    let path = paths::outcome_log_path(data_root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(line = lineno + 1, "skipping malformed outcome line: {e}");
            }
        }
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Signal translation
// ---------------------------------------------------------------------------

/// Convert an outcome's observed signals into a single feedback event type
/// and weight. The final type is whichever aggregate is larger, ties going
/// to helpful; the weight is clamped to [0.1, 2.0].
pub fn outcome_feedback(record: &OutcomeRecord) -> (FeedbackType, f64) {
    let mut helpful: f64 = 0.0;
    let mut harmful: f64 = 0.0;

    match record.outcome {
        OutcomeStatus::Success => helpful += 1.0,
        OutcomeStatus::Failure => harmful += 1.0,
        OutcomeStatus::Mixed => {
            helpful += 0.1;
            harmful += 0.1;
        }
    }

    if let Some(duration) = record.duration_seconds {
        if duration < FAST_THRESHOLD_SECONDS && record.outcome != OutcomeStatus::Failure {
            helpful += 0.5;
        } else if duration > SLOW_THRESHOLD_SECONDS {
            harmful += 0.3;
        }
    }

    match record.error_count {
        Some(n) if n >= 2 => harmful += 0.7,
        Some(1) => harmful += 0.3,
        _ => {}
    }

    if record.had_retries {
        harmful += 0.5;
    }

    match record.sentiment {
        Some(Sentiment::Positive) => helpful += 0.3,
        Some(Sentiment::Negative) => harmful += 0.5,
        _ => {}
    }

    if harmful > helpful {
        (
            FeedbackType::Harmful,
            harmful.clamp(MIN_EVENT_WEIGHT, MAX_EVENT_WEIGHT),
        )
    } else {
        (
            FeedbackType::Helpful,
            helpful.clamp(MIN_EVENT_WEIGHT, MAX_EVENT_WEIGHT),
        )
    }
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub events_applied: usize,
    pub unknown_rules: Vec<String>,
}

/// Append the outcome to the log and fan its feedback out to every cited
/// rule. Rules are resolved to the playbook file that owns them (repo
/// preferred over global), grouped by file, and each file is updated under
/// one lock acquisition.
pub fn apply_outcome(
    data_root: &Path,
    repo_root: Option<&Path>,
    record: &OutcomeRecord,
) -> Result<ApplyReport> {
    append_outcome(data_root, record)?;

    let (event_type, weight) = outcome_feedback(record);
    let mut report = ApplyReport::default();

    let mut by_file: HashMap<PathBuf, Vec<String>> = HashMap::new();
    for rule_id in &record.rules_used {
        let owner = playbook::resolve_owner(data_root, repo_root, rule_id)?;
        by_file.entry(owner).or_default().push(rule_id.clone());
    }

    // Lexicographic order keeps multi-file lock acquisition cycle-free.
    let mut files: Vec<_> = by_file.into_iter().collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));

    for (file, rule_ids) in files {
        with_lock(&file, || {
            let mut pb = Playbook::load(&file)?;
            for rule_id in &rule_ids {
                let recorded = pb.record_feedback(
                    rule_id,
                    event_type,
                    FeedbackDetails {
                        session_path: record.path.clone(),
                        reason: record.notes.clone(),
                        context: Some(format!(
                            "outcome:{} weight={weight:.1}",
                            record.outcome.as_str()
                        )),
                        ..Default::default()
                    },
                );
                if recorded {
                    report.events_applied += 1;
                } else {
                    report.unknown_rules.push(rule_id.clone());
                }
            }
            pb.save(&file)
        })?;
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
