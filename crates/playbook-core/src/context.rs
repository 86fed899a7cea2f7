//! Context ranker: given a task description, select the playbook bullets
//! and historical snippets most worth putting in front of an agent.

use crate::bullet::{Bullet, Maturity, Scope};
use crate::config::Config;
use crate::embedding::{EmbeddingCache, EmbeddingProvider};
use crate::history::{HistorySearch, HistorySnippet, SearchOptions};
use crate::playbook::Playbook;
use crate::scoring;
use crate::similarity;
use chrono::Utc;
use serde::Serialize;

const MAX_QUERY_KEYWORDS: usize = 5;

/// Floor applied to the effective score so mildly negative or unproven
/// bullets can still be ranked by relevance.
const SCORE_FLOOR: f64 = 0.1;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RankedBullet {
    pub id: String,
    pub content: String,
    pub category: String,
    pub maturity: Maturity,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub relevance: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextBriefing {
    pub task: String,
    pub relevant_bullets: Vec<RankedBullet>,
    pub anti_patterns: Vec<RankedBullet>,
    pub history_snippets: Vec<HistorySnippet>,
    pub deprecated_warnings: Vec<String>,
    pub suggested_history_queries: Vec<String>,
    /// Set when an external source could not be reached; the briefing is
    /// still usable but partial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

// ---------------------------------------------------------------------------
// Relevance
// ---------------------------------------------------------------------------

/// Keyword-overlap relevance in [0, 1]: the share of task keywords found in
/// the bullet's content or tags.
pub fn score_relevance(content: &str, tags: &[String], task_keywords: &[String]) -> f64 {
    if task_keywords.is_empty() {
        return 0.0;
    }
    let mut bullet_tokens = similarity::tokenize(content);
    for tag in tags {
        bullet_tokens.insert(tag.to_lowercase());
    }
    let hits = task_keywords
        .iter()
        .filter(|kw| bullet_tokens.contains(*kw))
        .count();
    hits as f64 / task_keywords.len() as f64
}

/// Embedding hooks for the ranker: a provider for the task text plus the
/// per-bullet vector cache.
pub struct SemanticHooks<'a> {
    pub provider: &'a dyn EmbeddingProvider,
    pub cache: &'a EmbeddingCache,
}

// ---------------------------------------------------------------------------
// Briefing
// ---------------------------------------------------------------------------

/// Load the merged (cascaded, toxic-filtered) playbook and build a briefing
/// for `task` in one step.
pub fn briefing_for_task(
    data_root: &std::path::Path,
    repo_root: Option<&std::path::Path>,
    task: &str,
    workspace: Option<&str>,
    history: &dyn HistorySearch,
    cfg: &Config,
) -> crate::error::Result<ContextBriefing> {
    let pb = crate::playbook::load_merged(data_root, repo_root)?;
    Ok(build_briefing(&pb, task, workspace, history, cfg))
}

pub fn build_briefing(
    pb: &Playbook,
    task: &str,
    workspace: Option<&str>,
    history: &dyn HistorySearch,
    cfg: &Config,
) -> ContextBriefing {
    build_briefing_semantic(pb, task, workspace, history, cfg, None)
}

pub fn build_briefing_semantic(
    pb: &Playbook,
    task: &str,
    workspace: Option<&str>,
    history: &dyn HistorySearch,
    cfg: &Config,
    semantic: Option<SemanticHooks<'_>>,
) -> ContextBriefing {
    let now = Utc::now();
    let task_keywords = similarity::keywords(task);
    let task_vector = semantic
        .as_ref()
        .and_then(|hooks| hooks.provider.embed(task));

    // Active bullets; workspace-scoped ones must match the requested
    // workspace, every other scope is retained.
    let candidates: Vec<&Bullet> = pb
        .bullets
        .iter()
        .filter(|b| b.is_active())
        .filter(|b| match (b.scope, workspace) {
            (Scope::Workspace, Some(ws)) => b.workspace.as_deref() == Some(ws),
            (Scope::Workspace, None) => false,
            _ => true,
        })
        .collect();

    let mut ranked: Vec<(f64, RankedBullet)> = Vec::new();
    for bullet in candidates {
        let mut relevance = score_relevance(&bullet.content, &bullet.tags, &task_keywords);
        if let (Some(task_vec), Some(hooks)) = (&task_vector, &semantic) {
            let bullet_vec = bullet
                .embedding
                .as_ref()
                .or_else(|| hooks.cache.get(&bullet.id));
            if let Some(vec) = bullet_vec {
                relevance = relevance.max(similarity::cosine(task_vec, vec));
            }
        }
        let effective = scoring::effective_score(bullet, &cfg.scoring, now);
        let final_score = relevance * effective.max(SCORE_FLOOR);
        if final_score > 0.0 {
            ranked.push((
                final_score,
                RankedBullet {
                    id: bullet.id.clone(),
                    content: bullet.content.clone(),
                    category: bullet.category.clone(),
                    maturity: bullet.maturity,
                    tags: bullet.tags.clone(),
                    relevance,
                    score: final_score,
                },
            ));
        }
    }
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(cfg.max_bullets_in_context);

    let (anti_patterns, relevant_bullets): (Vec<_>, Vec<_>) = ranked
        .into_iter()
        .map(|(_, rb)| rb)
        .partition(|rb| pb.find_bullet(&rb.id).is_some_and(Bullet::is_anti_pattern));

    // Historical snippets for the same keywords. Unreachable history
    // degrades to an annotated partial briefing.
    let query = task_keywords
        .iter()
        .take(MAX_QUERY_KEYWORDS)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    let mut degraded = None;
    let history_snippets = if query.is_empty() {
        Vec::new()
    } else {
        match history.search(
            &query,
            &SearchOptions {
                limit: cfg.max_history_in_context,
                days: cfg.session_lookback_days,
                workspace: workspace.map(str::to_string),
                ..Default::default()
            },
        ) {
            Ok(snippets) => snippets,
            Err(e) => {
                degraded = Some(format!("history: {e}"));
                Vec::new()
            }
        }
    };

    let deprecated_warnings = deprecated_warnings(pb, task, &history_snippets);
    let suggested_history_queries = suggest_queries(&task_keywords);

    ContextBriefing {
        task: task.to_string(),
        relevant_bullets,
        anti_patterns,
        history_snippets,
        deprecated_warnings,
        suggested_history_queries,
        degraded,
    }
}

/// Case-insensitive match of each deprecated pattern against the task text
/// and the retrieved snippets.
fn deprecated_warnings(pb: &Playbook, task: &str, snippets: &[HistorySnippet]) -> Vec<String> {
    let task_lower = task.to_lowercase();
    let mut warnings = Vec::new();
    for dp in &pb.deprecated_patterns {
        let needle = dp.pattern.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        let in_task = task_lower.contains(&needle);
        let in_history = snippets
            .iter()
            .any(|s| s.snippet.to_lowercase().contains(&needle));
        if in_task || in_history {
            let mut warning = format!("'{}' is deprecated", dp.pattern);
            if let Some(reason) = &dp.reason {
                warning.push_str(&format!(": {reason}"));
            }
            if let Some(replacement) = &dp.replacement {
                warning.push_str(&format!(" (use {replacement})"));
            }
            warnings.push(warning);
        }
    }
    warnings
}

fn suggest_queries(task_keywords: &[String]) -> Vec<String> {
    if task_keywords.is_empty() {
        return Vec::new();
    }
    let mut queries = Vec::new();
    for n in [5usize, 3, 2] {
        let q = task_keywords
            .iter()
            .take(n)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        if !queries.contains(&q) {
            queries.push(q);
        }
    }
    queries
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
