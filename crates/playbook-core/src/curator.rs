//! Applies a batch of proposed deltas to a playbook, deduplicating against
//! existing content, then runs the lifecycle post-processing pass
//! (promotions, demotions/auto-prune, inversions).
//!
//! The playbook is mutated in place; callers persist it under the file lock.

use crate::bullet::{FeedbackDetails, FeedbackType, Maturity, NewBullet};
use crate::config::Config;
use crate::error::Result;
use crate::playbook::Playbook;
use crate::scoring::{self, DemotionAction};
use crate::similarity;
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlaybookDelta {
    Add {
        bullet: NewBullet,
        source_session: String,
    },
    Helpful {
        bullet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_session: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    Harmful {
        bullet_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_session: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    Replace {
        bullet_id: String,
        new_content: String,
    },
    Deprecate {
        bullet_id: String,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replaced_by: Option<String>,
    },
    Merge {
        bullet_ids: Vec<String>,
        merged_content: String,
    },
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    /// Bullet id or a short description of the offending delta.
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Promotion {
    pub bullet_id: String,
    pub from: Maturity,
    pub to: Maturity,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inversion {
    pub original_id: String,
    pub anti_pattern_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CurationResult {
    pub applied: usize,
    pub skipped: usize,
    pub conflicts: Vec<Conflict>,
    pub promotions: Vec<Promotion>,
    pub inversions: Vec<Inversion>,
    pub pruned: usize,
}

// ---------------------------------------------------------------------------
// Curation
// ---------------------------------------------------------------------------

pub fn curate(pb: &mut Playbook, deltas: Vec<PlaybookDelta>, cfg: &Config) -> Result<CurationResult> {
    let mut result = CurationResult::default();

    for delta in deltas {
        apply_delta(pb, delta, cfg, &mut result);
    }

    post_process(pb, cfg, &mut result);
    Ok(result)
}

fn apply_delta(pb: &mut Playbook, delta: PlaybookDelta, cfg: &Config, result: &mut CurationResult) {
    match delta {
        PlaybookDelta::Add {
            bullet,
            source_session,
        } => apply_add(pb, bullet, &source_session, cfg, result),

        PlaybookDelta::Helpful {
            bullet_id,
            source_session,
            context,
        } => {
            let recorded = pb.record_feedback(
                &bullet_id,
                FeedbackType::Helpful,
                FeedbackDetails {
                    session_path: source_session,
                    context,
                    ..Default::default()
                },
            );
            tally(recorded, &bullet_id, result);
        }

        PlaybookDelta::Harmful {
            bullet_id,
            reason,
            source_session,
            context,
        } => {
            let recorded = pb.record_feedback(
                &bullet_id,
                FeedbackType::Harmful,
                FeedbackDetails {
                    session_path: source_session,
                    reason,
                    context,
                    ..Default::default()
                },
            );
            tally(recorded, &bullet_id, result);
        }

        PlaybookDelta::Replace {
            bullet_id,
            new_content,
        } => match pb.find_bullet_mut(&bullet_id) {
            Some(b) => {
                b.content_hash = Some(similarity::hash_content(&new_content));
                b.content = new_content;
                b.updated_at = Utc::now();
                result.applied += 1;
            }
            None => {
                result.skipped += 1;
                result.conflicts.push(Conflict {
                    reference: bullet_id,
                    reason: "bullet not found".to_string(),
                });
            }
        },

        PlaybookDelta::Deprecate {
            bullet_id,
            reason,
            replaced_by,
        } => match pb.deprecate_bullet(&bullet_id, &reason, replaced_by) {
            Ok(true) => result.applied += 1,
            Ok(false) => {
                result.skipped += 1;
                result.conflicts.push(Conflict {
                    reference: bullet_id,
                    reason: "bullet not found".to_string(),
                });
            }
            Err(e) => {
                result.skipped += 1;
                result.conflicts.push(Conflict {
                    reference: bullet_id,
                    reason: e.to_string(),
                });
            }
        },

        PlaybookDelta::Merge {
            bullet_ids,
            merged_content,
        } => apply_merge(pb, &bullet_ids, merged_content, result),
    }
}

fn tally(recorded: bool, bullet_id: &str, result: &mut CurationResult) {
    if recorded {
        result.applied += 1;
    } else {
        result.skipped += 1;
        result.conflicts.push(Conflict {
            reference: bullet_id.to_string(),
            reason: "bullet not found".to_string(),
        });
    }
}

fn apply_add(
    pb: &mut Playbook,
    bullet: NewBullet,
    source_session: &str,
    cfg: &Config,
    result: &mut CurationResult,
) {
    if bullet.content.trim().is_empty() || bullet.category.trim().is_empty() {
        result.skipped += 1;
        result.conflicts.push(Conflict {
            reference: "add".to_string(),
            reason: "content and category are required".to_string(),
        });
        return;
    }

    // Exact duplicate of an active bullet: nothing to learn, skip.
    let hash = similarity::hash_content(&bullet.content);
    let exact_dup = pb.bullets.iter().any(|b| {
        b.is_active()
            && b.content_hash
                .clone()
                .unwrap_or_else(|| similarity::hash_content(&b.content))
                == hash
    });
    if exact_dup {
        result.skipped += 1;
        return;
    }

    // Near-duplicate: the new insight reinforces the existing rule instead
    // of cluttering the playbook with a rewording.
    if let Some((idx, _)) =
        similarity::find_similar_bullet(&pb.bullets, &bullet.content, cfg.dedup_similarity_threshold)
    {
        let existing = &mut pb.bullets[idx];
        existing.record_feedback(
            FeedbackType::Helpful,
            FeedbackDetails {
                session_path: Some(source_session.to_string()),
                context: Some("Reinforced by similar insight".to_string()),
                ..Default::default()
            },
            Utc::now(),
        );
        result.applied += 1;
        return;
    }

    pb.add_bullet(bullet, source_session, None);
    result.applied += 1;
}

fn apply_merge(
    pb: &mut Playbook,
    bullet_ids: &[String],
    merged_content: String,
    result: &mut CurationResult,
) {
    let resolved: Vec<String> = bullet_ids
        .iter()
        .filter(|id| pb.find_bullet(id).is_some())
        .cloned()
        .collect();
    if resolved.len() < 2 {
        result.skipped += 1;
        result.conflicts.push(Conflict {
            reference: bullet_ids.join(","),
            reason: format!(
                "merge requires at least two resolvable bullets, got {}",
                resolved.len()
            ),
        });
        return;
    }
    if let Some(pinned) = resolved
        .iter()
        .find(|id| pb.find_bullet(id).is_some_and(|b| b.pinned))
    {
        result.skipped += 1;
        result.conflicts.push(Conflict {
            reference: pinned.clone(),
            reason: "cannot merge a pinned bullet".to_string(),
        });
        return;
    }

    let first = pb.find_bullet(&resolved[0]).expect("resolved above");
    let category = first.category.clone();
    let source_session = first.source_sessions.first().cloned().unwrap_or_default();
    let mut tags: Vec<String> = Vec::new();
    let mut sessions: Vec<String> = Vec::new();
    for id in &resolved {
        let b = pb.find_bullet(id).expect("resolved above");
        for tag in &b.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        for s in &b.source_sessions {
            if !sessions.contains(s) {
                sessions.push(s.clone());
            }
        }
    }

    let new_id = pb.add_bullet(
        NewBullet {
            content: merged_content,
            category,
            tags,
            ..Default::default()
        },
        &source_session,
        None,
    );
    if let Some(b) = pb.find_bullet_mut(&new_id) {
        b.source_sessions = sessions;
    }

    for id in &resolved {
        // Pinned sources were rejected above, so this cannot error.
        let _ = pb.deprecate_bullet(id, "merged into another bullet", Some(new_id.clone()));
    }
    result.applied += 1;
}

// ---------------------------------------------------------------------------
// Post-processing
// ---------------------------------------------------------------------------

fn post_process(pb: &mut Playbook, cfg: &Config, result: &mut CurationResult) {
    let now = Utc::now();

    // 1. Promotions.
    for bullet in &mut pb.bullets {
        if bullet.maturity == Maturity::Deprecated {
            continue;
        }
        if let Some(target) = scoring::promotion_target(bullet, &cfg.scoring, now) {
            let (helpful, harmful) = scoring::decayed_counts(bullet, &cfg.scoring, now);
            result.promotions.push(Promotion {
                bullet_id: bullet.id.clone(),
                from: bullet.maturity,
                to: target,
                reason: format!("decayed feedback {helpful:.1} helpful / {harmful:.1} harmful"),
            });
            bullet.maturity = target;
            bullet.updated_at = now;
        }
    }

    // 2. Demotions and auto-prune. Inversion candidates are left for step 3
    // so their signal survives as an anti-pattern instead of being pruned.
    for bullet in &mut pb.bullets {
        if !bullet.is_active() || scoring::should_invert(bullet, &cfg.scoring, now) {
            continue;
        }
        match scoring::demotion_action(bullet, cfg, now) {
            DemotionAction::AutoDeprecate => {
                let effective = scoring::effective_score(bullet, &cfg.scoring, now);
                bullet.retire(
                    &format!("auto-pruned: effective score {effective:.1}"),
                    None,
                    now,
                );
                result.pruned += 1;
            }
            DemotionAction::Demote(target) => {
                bullet.maturity = target;
                bullet.updated_at = now;
            }
            DemotionAction::None => {}
        }
    }

    // 3. Inversions.
    let to_invert: Vec<usize> = pb
        .bullets
        .iter()
        .enumerate()
        .filter(|(_, b)| scoring::should_invert(b, &cfg.scoring, now))
        .map(|(i, _)| i)
        .collect();
    for idx in to_invert {
        let anti = scoring::invert(&pb.bullets[idx], &cfg.scoring, now);
        let anti_id = anti.id.clone();
        let original_id = pb.bullets[idx].id.clone();
        pb.bullets[idx].retire(
            "inverted into anti-pattern",
            Some(anti_id.clone()),
            now,
        );
        pb.bullets.push(anti);
        result.inversions.push(Inversion {
            original_id,
            anti_pattern_id: anti_id,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bullet::{BulletKind, FeedbackEvent};
    use chrono::Duration;

    fn add_delta(content: &str) -> PlaybookDelta {
        PlaybookDelta::Add {
            bullet: NewBullet {
                content: content.to_string(),
                category: "workflow".to_string(),
                ..Default::default()
            },
            source_session: "/x/.claude/session.jsonl".to_string(),
        }
    }

    fn seeded(contents: &[&str]) -> Playbook {
        let mut pb = Playbook::new("test");
        for c in contents {
            pb.add_bullet(
                NewBullet {
                    content: c.to_string(),
                    category: "workflow".to_string(),
                    ..Default::default()
                },
                "seed-session",
                None,
            );
        }
        pb
    }

    #[test]
    fn add_creates_new_bullet() {
        let mut pb = Playbook::new("test");
        let cfg = Config::default();
        let result = curate(&mut pb, vec![add_delta("run tests before pushing")], &cfg).unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(pb.bullets.len(), 1);
    }

    #[test]
    fn add_without_category_is_skipped() {
        let mut pb = Playbook::new("test");
        let cfg = Config::default();
        let delta = PlaybookDelta::Add {
            bullet: NewBullet {
                content: "something".to_string(),
                category: "  ".to_string(),
                ..Default::default()
            },
            source_session: "s".to_string(),
        };
        let result = curate(&mut pb, vec![delta], &cfg).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.conflicts.len(), 1);
        assert!(pb.bullets.is_empty());
    }

    #[test]
    fn exact_duplicate_is_skipped() {
        let mut pb = seeded(&["Run tests before pushing"]);
        let cfg = Config::default();
        let result = curate(&mut pb, vec![add_delta("run tests   before PUSHING")], &cfg).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(pb.bullets.len(), 1);
    }

    #[test]
    fn near_duplicate_reinforces_existing() {
        let mut pb = seeded(&["always run the full test suite before pushing commits upstream"]);
        let cfg = Config::default();
        let result = curate(
            &mut pb,
            vec![add_delta(
                "always run the full test suite before pushing commits",
            )],
            &cfg,
        )
        .unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(pb.bullets.len(), 1);
        let b = &pb.bullets[0];
        assert_eq!(b.helpful_count, 1);
        assert_eq!(
            b.feedback_events[0].context.as_deref(),
            Some("Reinforced by similar insight")
        );
    }

    #[test]
    fn no_two_active_bullets_share_a_hash_after_curation() {
        let mut pb = seeded(&["rule one about testing", "rule two about deploys"]);
        let cfg = Config::default();
        curate(
            &mut pb,
            vec![
                add_delta("rule ONE about testing"),
                add_delta("an unrelated brand new rule"),
            ],
            &cfg,
        )
        .unwrap();

        let hashes: Vec<String> = pb
            .active_bullets()
            .iter()
            .map(|b| similarity::hash_content(&b.content))
            .collect();
        let mut dedup = hashes.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(hashes.len(), dedup.len());
    }

    #[test]
    fn active_count_grows_by_at_most_adds() {
        let mut pb = seeded(&["existing rule about testing"]);
        let cfg = Config::default();
        let before = pb.active_bullets().len();
        let adds = vec![
            add_delta("new rule about deploys"),
            add_delta("new rule about logging"),
            add_delta("existing rule about testing"),
        ];
        let n = adds.len();
        curate(&mut pb, adds, &cfg).unwrap();
        assert!(pb.active_bullets().len() <= before + n);
    }

    #[test]
    fn helpful_and_harmful_record_events() {
        let mut pb = seeded(&["a rule"]);
        let id = pb.bullets[0].id.clone();
        let cfg = Config::default();
        let result = curate(
            &mut pb,
            vec![
                PlaybookDelta::Helpful {
                    bullet_id: id.clone(),
                    source_session: Some("s1".to_string()),
                    context: None,
                },
                PlaybookDelta::Harmful {
                    bullet_id: id.clone(),
                    reason: Some("caused a regression".to_string()),
                    source_session: None,
                    context: None,
                },
            ],
            &cfg,
        )
        .unwrap();
        assert_eq!(result.applied, 2);
        let b = pb.find_bullet(&id).unwrap();
        assert_eq!(b.helpful_count, 1);
        assert_eq!(b.harmful_count, 1);
        assert!(b.last_validated_at.is_some());
    }

    #[test]
    fn unknown_id_is_a_conflict() {
        let mut pb = Playbook::new("test");
        let cfg = Config::default();
        let result = curate(
            &mut pb,
            vec![PlaybookDelta::Helpful {
                bullet_id: "b-missing".to_string(),
                source_session: None,
                context: None,
            }],
            &cfg,
        )
        .unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.conflicts[0].reference, "b-missing");
    }

    #[test]
    fn replace_updates_content_and_hash() {
        let mut pb = seeded(&["old content"]);
        let id = pb.bullets[0].id.clone();
        let cfg = Config::default();
        curate(
            &mut pb,
            vec![PlaybookDelta::Replace {
                bullet_id: id.clone(),
                new_content: "new improved content".to_string(),
            }],
            &cfg,
        )
        .unwrap();
        let b = pb.find_bullet(&id).unwrap();
        assert_eq!(b.content, "new improved content");
        assert_eq!(
            b.content_hash.as_deref(),
            Some(similarity::hash_content("new improved content").as_str())
        );
    }

    #[test]
    fn merge_combines_and_retires_sources() {
        let mut pb = seeded(&["use rebase workflows", "prefer linear history"]);
        pb.bullets[0].tags = vec!["git".to_string()];
        pb.bullets[1].tags = vec!["git".to_string(), "history".to_string()];
        let ids: Vec<String> = pb.bullets.iter().map(|b| b.id.clone()).collect();
        let cfg = Config::default();

        let result = curate(
            &mut pb,
            vec![PlaybookDelta::Merge {
                bullet_ids: ids.clone(),
                merged_content: "rebase onto main to keep a linear history".to_string(),
            }],
            &cfg,
        )
        .unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(pb.bullets.len(), 3);

        let merged = pb
            .bullets
            .iter()
            .find(|b| b.content.starts_with("rebase onto"))
            .unwrap();
        assert_eq!(merged.category, "workflow");
        assert_eq!(merged.tags, vec!["git".to_string(), "history".to_string()]);

        for id in &ids {
            let source = pb.find_bullet(id).unwrap();
            assert!(!source.is_active());
            assert_eq!(source.replaced_by.as_deref(), Some(merged.id.as_str()));
        }
    }

    #[test]
    fn merge_with_one_resolvable_source_is_conflict() {
        let mut pb = seeded(&["only rule"]);
        let id = pb.bullets[0].id.clone();
        let cfg = Config::default();
        let result = curate(
            &mut pb,
            vec![PlaybookDelta::Merge {
                bullet_ids: vec![id, "b-missing".to_string()],
                merged_content: "merged".to_string(),
            }],
            &cfg,
        )
        .unwrap();
        assert_eq!(result.skipped, 1);
        assert!(result.conflicts[0].reason.contains("at least two"));
        assert_eq!(pb.bullets.len(), 1);
    }

    #[test]
    fn empty_delta_list_still_post_processes() {
        let now = Utc::now();
        let mut pb = seeded(&["well loved rule"]);
        for _ in 0..6 {
            pb.bullets[0].feedback_events.push(FeedbackEvent {
                event_type: FeedbackType::Helpful,
                timestamp: now,
                session_path: None,
                reason: None,
                context: None,
            });
        }
        pb.bullets[0].regenerate_counters();
        let cfg = Config::default();

        let result = curate(&mut pb, vec![], &cfg).unwrap();
        assert_eq!(result.applied, 0);
        assert_eq!(result.promotions.len(), 1);
        assert_eq!(pb.bullets[0].maturity, Maturity::Proven);
        assert_eq!(pb.bullets.len(), 1);
    }

    #[test]
    fn harmful_bullet_is_inverted() {
        let now = Utc::now();
        let mut pb = seeded(&["force push to shared branches"]);
        pb.bullets[0].feedback_events.push(FeedbackEvent {
            event_type: FeedbackType::Helpful,
            timestamp: now - Duration::days(200),
            session_path: None,
            reason: None,
            context: None,
        });
        for _ in 0..5 {
            pb.bullets[0].feedback_events.push(FeedbackEvent {
                event_type: FeedbackType::Harmful,
                timestamp: now,
                session_path: None,
                reason: None,
                context: None,
            });
        }
        pb.bullets[0].regenerate_counters();
        let original_id = pb.bullets[0].id.clone();
        let cfg = Config::default();

        let result = curate(&mut pb, vec![], &cfg).unwrap();
        assert_eq!(result.inversions.len(), 1);

        let anti = pb
            .find_bullet(&result.inversions[0].anti_pattern_id)
            .unwrap();
        assert!(anti.content.starts_with("AVOID: "));
        assert_eq!(anti.kind, BulletKind::AntiPattern);

        let original = pb.find_bullet(&original_id).unwrap();
        assert!(!original.is_active());
        assert_eq!(original.replaced_by.as_deref(), Some(anti.id.as_str()));
    }

    #[test]
    fn pinned_bullets_survive_post_processing() {
        let now = Utc::now();
        let mut pb = seeded(&["controversial but vetted rule"]);
        for _ in 0..5 {
            pb.bullets[0].feedback_events.push(FeedbackEvent {
                event_type: FeedbackType::Harmful,
                timestamp: now,
                session_path: None,
                reason: None,
                context: None,
            });
        }
        pb.bullets[0].regenerate_counters();
        pb.bullets[0].pinned = true;
        let cfg = Config::default();

        let result = curate(&mut pb, vec![], &cfg).unwrap();
        assert_eq!(result.pruned, 0);
        assert!(result.inversions.is_empty());
        assert!(pb.bullets[0].is_active());
    }

    #[test]
    fn heavily_harmful_unpinned_bullet_is_pruned() {
        let now = Utc::now();
        let mut pb = seeded(&["bad advice"]);
        // Keep harmful below the inversion floor so only pruning fires:
        // 2 harmful, raw = -8, candidate multiplier 0.5 -> effective -4 < -2.
        for _ in 0..2 {
            pb.bullets[0].feedback_events.push(FeedbackEvent {
                event_type: FeedbackType::Harmful,
                timestamp: now,
                session_path: None,
                reason: None,
                context: None,
            });
        }
        pb.bullets[0].regenerate_counters();
        let cfg = Config::default();

        let result = curate(&mut pb, vec![], &cfg).unwrap();
        assert_eq!(result.pruned, 1);
        assert!(!pb.bullets[0].is_active());
    }

    #[test]
    fn delta_json_shape() {
        let json = r#"{"op":"add","bullet":{"content":"x","category":"y"},"source_session":"s"}"#;
        let delta: PlaybookDelta = serde_json::from_str(json).unwrap();
        assert!(matches!(delta, PlaybookDelta::Add { .. }));

        let json = r#"{"op":"harmful","bullet_id":"b-1","reason":"broke ci"}"#;
        let delta: PlaybookDelta = serde_json::from_str(json).unwrap();
        assert!(matches!(delta, PlaybookDelta::Harmful { .. }));
    }
}
