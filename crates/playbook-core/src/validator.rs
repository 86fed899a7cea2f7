//! External validator contract: given a candidate rule and the historical
//! evidence the gate collected, an LLM renders a verdict. The core only
//! normalizes verdicts; it never talks to a model itself.

use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Accept,
    Reject,
    AcceptWithCaution,
    Refine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    pub verdict: VerdictKind,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_refinement: Option<String>,
}

pub trait RuleValidator {
    fn validate(&self, candidate: &str, evidence: &str) -> Result<Verdict>;
}

/// Normalize a raw verdict: `REFINE` becomes accept-with-caution at reduced
/// confidence, since a refinable rule is still directionally useful.
pub fn normalize(mut verdict: Verdict) -> Verdict {
    if verdict.verdict == VerdictKind::Refine {
        verdict.verdict = VerdictKind::AcceptWithCaution;
        verdict.confidence *= 0.8;
        verdict.valid = true;
    }
    verdict
}

impl Verdict {
    /// Whether the (normalized) verdict lets the rule into the playbook.
    pub fn accepts(&self) -> bool {
        matches!(
            self.verdict,
            VerdictKind::Accept | VerdictKind::AcceptWithCaution
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(kind: VerdictKind, confidence: f64) -> Verdict {
        Verdict {
            valid: kind == VerdictKind::Accept,
            verdict: kind,
            confidence,
            evidence: Vec::new(),
            suggested_refinement: None,
        }
    }

    #[test]
    fn refine_normalizes_to_caution_with_reduced_confidence() {
        let v = normalize(verdict(VerdictKind::Refine, 0.9));
        assert_eq!(v.verdict, VerdictKind::AcceptWithCaution);
        assert!((v.confidence - 0.72).abs() < 1e-9);
        assert!(v.valid);
        assert!(v.accepts());
    }

    #[test]
    fn other_verdicts_pass_through() {
        let v = normalize(verdict(VerdictKind::Reject, 0.8));
        assert_eq!(v.verdict, VerdictKind::Reject);
        assert!((v.confidence - 0.8).abs() < 1e-9);
        assert!(!v.accepts());

        let v = normalize(verdict(VerdictKind::Accept, 0.7));
        assert!(v.accepts());
    }

    #[test]
    fn verdict_json_uses_screaming_case() {
        let json = r#"{"valid":true,"verdict":"ACCEPT_WITH_CAUTION","confidence":0.6}"#;
        let v: Verdict = serde_json::from_str(json).unwrap();
        assert_eq!(v.verdict, VerdictKind::AcceptWithCaution);
    }
}
