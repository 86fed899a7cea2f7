//! Time-decayed feedback scoring and the bullet maturity state machine.
//!
//! All functions here are pure: they take an explicit `now` so decay math is
//! reproducible in tests and across a batch (one timestamp per curator run).

use crate::bullet::{Bullet, BulletKind, FeedbackType, Maturity, NewBullet, RuleType};
use crate::config::{Config, ScoringConfig};
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Decay
// ---------------------------------------------------------------------------

/// Contribution of one feedback event: `0.5^(age_days / half_life)`.
/// Future-dated events clamp to age 0, contributing exactly 1.
pub fn decay_factor(timestamp: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_days = (now - timestamp).num_seconds() as f64 / 86_400.0;
    0.5f64.powf(age_days.max(0.0) / half_life_days)
}

/// Decayed helpful and harmful sums, using the bullet's half-life override
/// when present, else the configured default.
pub fn decayed_counts(bullet: &Bullet, cfg: &ScoringConfig, now: DateTime<Utc>) -> (f64, f64) {
    let half_life = bullet
        .confidence_decay_half_life_days
        .unwrap_or(cfg.decay_half_life_days);
    let mut helpful = 0.0;
    let mut harmful = 0.0;
    for event in &bullet.feedback_events {
        let weight = decay_factor(event.timestamp, now, half_life);
        match event.event_type {
            FeedbackType::Helpful => helpful += weight,
            FeedbackType::Harmful => harmful += weight,
        }
    }
    (helpful, harmful)
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

pub fn maturity_multiplier(maturity: Maturity) -> f64 {
    match maturity {
        Maturity::Candidate => 0.5,
        Maturity::Established => 1.0,
        Maturity::Proven => 1.5,
        Maturity::Deprecated => 0.0,
    }
}

/// Raw score: decayed helpful minus the harmful multiplier times decayed
/// harmful. The asymmetry makes trust erode much faster than it builds.
pub fn raw_score(decayed_helpful: f64, decayed_harmful: f64, cfg: &ScoringConfig) -> f64 {
    decayed_helpful - cfg.harmful_multiplier * decayed_harmful
}

pub fn effective_score(bullet: &Bullet, cfg: &ScoringConfig, now: DateTime<Utc>) -> f64 {
    let (helpful, harmful) = decayed_counts(bullet, cfg, now);
    raw_score(helpful, harmful, cfg) * maturity_multiplier(bullet.maturity)
}

// ---------------------------------------------------------------------------
// Maturity state machine
// ---------------------------------------------------------------------------

/// The maturity the FSM assigns given current decayed feedback.
pub fn assess_maturity(bullet: &Bullet, cfg: &ScoringConfig, now: DateTime<Utc>) -> Maturity {
    if bullet.maturity == Maturity::Deprecated || bullet.deprecated {
        return Maturity::Deprecated;
    }
    let (helpful, harmful) = decayed_counts(bullet, cfg, now);
    let total = helpful + harmful;
    let harmful_ratio = if total > 0.0 { harmful / total } else { 0.0 };

    if harmful_ratio > 0.3 && total > cfg.min_feedback_for_active {
        Maturity::Deprecated
    } else if total < cfg.min_feedback_for_active {
        Maturity::Candidate
    } else if helpful >= cfg.min_helpful_for_proven
        && harmful_ratio < cfg.max_harmful_ratio_for_proven
    {
        Maturity::Proven
    } else {
        Maturity::Established
    }
}

/// Forward-only promotion target. `proven` and `deprecated` are sinks, and
/// the FSM's deprecated outcome is never applied through promotion.
pub fn promotion_target(bullet: &Bullet, cfg: &ScoringConfig, now: DateTime<Utc>) -> Option<Maturity> {
    if matches!(bullet.maturity, Maturity::Proven | Maturity::Deprecated) {
        return None;
    }
    let target = assess_maturity(bullet, cfg, now);
    if target == Maturity::Deprecated || target.rank() <= bullet.maturity.rank() {
        return None;
    }
    Some(target)
}

// ---------------------------------------------------------------------------
// Demotion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DemotionAction {
    None,
    Demote(Maturity),
    AutoDeprecate,
}

/// What sustained negative evidence does to a bullet. Pinned bullets are
/// exempt from both outcomes.
pub fn demotion_action(bullet: &Bullet, cfg: &Config, now: DateTime<Utc>) -> DemotionAction {
    if bullet.pinned {
        return DemotionAction::None;
    }
    let effective = effective_score(bullet, &cfg.scoring, now);
    if effective < -cfg.prune_harmful_threshold {
        return DemotionAction::AutoDeprecate;
    }
    if effective < 0.0 {
        return match bullet.maturity {
            Maturity::Proven => DemotionAction::Demote(Maturity::Established),
            Maturity::Established => DemotionAction::Demote(Maturity::Candidate),
            _ => DemotionAction::None,
        };
    }
    DemotionAction::None
}

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

/// A bullet is stale when it has received no signal for `stale_days`: never
/// any feedback since creation, or no feedback event recently enough.
pub fn is_stale(bullet: &Bullet, cfg: &ScoringConfig, now: DateTime<Utc>) -> bool {
    let last_event = bullet.feedback_events.iter().map(|e| e.timestamp).max();
    let reference = last_event.unwrap_or(bullet.created_at);
    (now - reference).num_days() > cfg.stale_days
}

// ---------------------------------------------------------------------------
// Anti-pattern inversion
// ---------------------------------------------------------------------------

/// A rule that keeps hurting becomes advice to avoid. Fires for active,
/// non-pinned, non-anti-pattern bullets with decayed harmful >= 3 and more
/// than double the decayed helpful.
pub fn should_invert(bullet: &Bullet, cfg: &ScoringConfig, now: DateTime<Utc>) -> bool {
    if bullet.pinned || bullet.is_anti_pattern() || !bullet.is_active() {
        return false;
    }
    let (helpful, harmful) = decayed_counts(bullet, cfg, now);
    harmful >= 3.0 && harmful > 2.0 * helpful
}

/// Build the replacement anti-pattern for a bullet being inverted. The
/// caller deprecates the original with `replaced_by` pointing here.
pub fn invert(bullet: &Bullet, cfg: &ScoringConfig, now: DateTime<Utc>) -> Bullet {
    let stripped = bullet.content.trim().trim_end_matches(['.', '!']).trim();
    let reason = bullet
        .feedback_events
        .iter()
        .rev()
        .find(|e| e.event_type == FeedbackType::Harmful)
        .and_then(|e| e.reason.clone())
        .unwrap_or_else(|| "repeatedly caused failures".to_string());

    let source_session = bullet
        .source_sessions
        .first()
        .cloned()
        .unwrap_or_default();
    let mut anti = Bullet::create(
        NewBullet {
            content: format!("AVOID: {stripped}. {reason}"),
            category: bullet.category.clone(),
            kind: Some(BulletKind::AntiPattern),
            tags: bullet.tags.clone(),
            scope: Some(bullet.scope),
            scope_key: bullet.scope_key.clone(),
            workspace: bullet.workspace.clone(),
            suggested_state: None,
        },
        &source_session,
        Some(cfg.decay_half_life_days),
        now,
    );
    anti.source_sessions = bullet.source_sessions.clone();
    anti.source_agents = bullet.source_agents.clone();
    anti.rule_type = RuleType::AntiPattern;
    anti.is_negative = true;
    anti.maturity = Maturity::Candidate;
    anti
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
