//! The evidence gate: a cheap pre-LLM filter over proposed new rules.
//! Historical sessions that mention the rule's keywords are classified as
//! successes or failures; a strong signal either way decides the rule
//! without spending a validator call.

use crate::bullet::BulletState;
use crate::config::Config;
use crate::error::PlaybookError;
use crate::history::{HistorySearch, HistorySnippet, SearchOptions};
use crate::similarity;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

const SEARCH_LIMIT: usize = 20;
const MAX_QUERY_KEYWORDS: usize = 8;

const AUTO_ACCEPT_SUCCESSES: usize = 5;
const AUTO_REJECT_FAILURES: usize = 3;

// Word-boundary anchored so prose like "fixed-width" or "error-prone" never
// counts as evidence.
const SUCCESS_PATTERNS: &[&str] = &[
    r"(?i)\bfixed (the|a|an|it|this|that)\b",
    r"(?i)\bsuccessfully\b",
    r"(?i)\bsolved (the|a|an|it|this)\b",
    r"(?i)\bworks (now|correctly|properly)\b",
    r"(?i)\bresolved\b",
    r"(?i)\bworking now\b",
];

const FAILURE_PATTERNS: &[&str] = &[
    r"(?i)\bfailed (to|with)\b",
    r"(?i)\berror:",
    r"(?i)\b(threw|throws)\b.{0,60}\berror",
    r"(?i)\bbroken\b",
    r"(?i)\bcrash(ed|es|ing)?\b",
    r"(?i)\bbug (in|found|caused)\b",
    r"(?i)\bdoesn't work\b",
];

fn success_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        SUCCESS_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("success pattern"))
            .collect()
    })
}

fn failure_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        FAILURE_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("failure pattern"))
            .collect()
    })
}

pub fn is_success_snippet(text: &str) -> bool {
    success_res().iter().any(|re| re.is_match(text))
}

pub fn is_failure_snippet(text: &str) -> bool {
    failure_res().iter().any(|re| re.is_match(text))
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub passed: bool,
    pub reason: String,
    pub suggested_state: BulletState,
    pub session_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

impl GateDecision {
    fn fail_open(reason: String) -> Self {
        Self {
            passed: true,
            reason,
            suggested_state: BulletState::Draft,
            session_count: 0,
            success_count: 0,
            failure_count: 0,
        }
    }

    /// The validator is consulted only for this outcome.
    pub fn is_ambiguous(&self) -> bool {
        self.passed && self.reason.starts_with("ambiguous")
    }
}

/// Decide whether a proposed rule is cheap-accept, cheap-reject, or must go
/// to the external validator.
pub fn evaluate(content: &str, history: &dyn HistorySearch, cfg: &Config) -> GateDecision {
    evaluate_with_evidence(content, history, cfg).0
}

/// Like `evaluate`, but also returns the snippets that informed the
/// decision so an ambiguous outcome can hand them to the validator.
pub fn evaluate_with_evidence(
    content: &str,
    history: &dyn HistorySearch,
    cfg: &Config,
) -> (GateDecision, Vec<HistorySnippet>) {
    let keywords = similarity::keywords(content);
    let query = keywords
        .iter()
        .take(MAX_QUERY_KEYWORDS)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    let snippets = match history.search(
        &query,
        &SearchOptions {
            limit: SEARCH_LIMIT,
            days: cfg.validation_lookback_days,
            ..Default::default()
        },
    ) {
        Ok(snippets) => snippets,
        Err(PlaybookError::HistoryUnavailable(reason)) => {
            return (
                GateDecision::fail_open(format!(
                    "history unavailable ({reason}), skipping evidence check (fail-open)"
                )),
                Vec::new(),
            );
        }
        Err(e) => {
            return (
                GateDecision::fail_open(format!(
                    "history search failed ({e}), skipping evidence check (fail-open)"
                )),
                Vec::new(),
            );
        }
    };

    // One vote per distinct session, regardless of how many snippets it
    // contributed.
    let mut sessions: HashMap<&str, (bool, bool)> = HashMap::new();
    for snippet in &snippets {
        let entry = sessions
            .entry(snippet.source_path.as_str())
            .or_insert((false, false));
        entry.0 |= is_success_snippet(&snippet.snippet);
        entry.1 |= is_failure_snippet(&snippet.snippet);
    }
    let session_count = sessions.len();
    let success_count = sessions.values().filter(|(s, _)| *s).count();
    let failure_count = sessions.values().filter(|(_, f)| *f).count();

    let (passed, reason, suggested_state) = if session_count == 0 {
        (
            true,
            "no historical evidence".to_string(),
            BulletState::Draft,
        )
    } else if success_count >= AUTO_ACCEPT_SUCCESSES && failure_count == 0 {
        (
            true,
            format!("strong historical success across {success_count} sessions"),
            BulletState::Active,
        )
    } else if failure_count >= AUTO_REJECT_FAILURES && success_count == 0 {
        (
            false,
            format!("consistent historical failure across {failure_count} sessions"),
            BulletState::Draft,
        )
    } else {
        (
            true,
            "ambiguous historical evidence, defer to validator".to_string(),
            BulletState::Draft,
        )
    };

    (
        GateDecision {
            passed,
            reason,
            suggested_state,
            session_count,
            success_count,
            failure_count,
        },
        snippets,
    )
}

/// Helpful to the validator: the raw snippet text joined as evidence.
pub fn evidence_text(snippets: &[HistorySnippet]) -> String {
    snippets
        .iter()
        .map(|s| s.snippet.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
