//! The playbook store: a versioned YAML document of bullets with cascading
//! global/repo sources, a toxic-content filter, and CRUD that preserves the
//! lifecycle invariants.
//!
//! Layout:
//!   <data root>/playbook.yaml      — global playbook
//!   <repo>/.cass/playbook.yaml     — per-repo overlay (wins by id)
//!   <data root>/toxic_bullets.log  — global toxic log
//!   <repo>/.cass/toxic.log         — per-repo toxic log

use crate::bullet::{Bullet, FeedbackDetails, FeedbackType, NewBullet};
use crate::error::{PlaybookError, Result};
use crate::toxic;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Metadata / deprecated patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookMetadata {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reflection: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_reflections: u64,
    #[serde(default)]
    pub total_sessions_processed: u64,
}

impl PlaybookMetadata {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_reflection: None,
            total_reflections: 0,
            total_sessions_processed: 0,
        }
    }
}

/// A banned approach, matched case-insensitively against task text and
/// history snippets when building context briefings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecatedPattern {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

// ---------------------------------------------------------------------------
// Playbook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub metadata: PlaybookMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deprecated_patterns: Vec<DeprecatedPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bullets: Vec<Bullet>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_name() -> String {
    "playbook".to_string()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybookStats {
    pub total: usize,
    pub active: usize,
    pub pinned: usize,
    pub by_maturity: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
}

impl Playbook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            name: name.into(),
            description: String::new(),
            metadata: PlaybookMetadata::new(Utc::now()),
            deprecated_patterns: Vec::new(),
            bullets: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load a playbook file. A missing or empty file yields an empty
    /// playbook. A file that fails to parse is quarantined to
    /// `<path>.backup.<epoch>` and an empty playbook is returned — user data
    /// is never silently dropped.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new("playbook"));
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::new("playbook"));
        }
        match serde_yaml::from_str::<Self>(&data) {
            Ok(pb) => Ok(pb),
            Err(e) => {
                let backup = quarantine_path(path, Utc::now());
                std::fs::rename(path, &backup)?;
                tracing::warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    "playbook failed to parse, quarantined: {e}"
                );
                Ok(Self::new("playbook"))
            }
        }
    }

    /// Serialize and atomically replace the file, stamping
    /// `metadata.last_reflection`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.metadata.last_reflection = Some(Utc::now());
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn find_bullet(&self, id: &str) -> Option<&Bullet> {
        self.bullets.iter().find(|b| b.id == id)
    }

    pub fn find_bullet_mut(&mut self, id: &str) -> Option<&mut Bullet> {
        self.bullets.iter_mut().find(|b| b.id == id)
    }

    pub fn active_bullets(&self) -> Vec<&Bullet> {
        self.bullets.iter().filter(|b| b.is_active()).collect()
    }

    pub fn bullets_by_category(&self, category: &str) -> Vec<&Bullet> {
        self.bullets
            .iter()
            .filter(|b| b.category.eq_ignore_ascii_case(category))
            .collect()
    }

    pub fn filter_by_scope(&self, scope: crate::bullet::Scope) -> Vec<&Bullet> {
        self.bullets.iter().filter(|b| b.scope == scope).collect()
    }

    pub fn stats(&self) -> PlaybookStats {
        let mut stats = PlaybookStats {
            total: self.bullets.len(),
            ..Default::default()
        };
        for b in &self.bullets {
            if b.is_active() {
                stats.active += 1;
            }
            if b.pinned {
                stats.pinned += 1;
            }
            *stats
                .by_maturity
                .entry(b.maturity.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_category
                .entry(b.category.to_lowercase())
                .or_default() += 1;
        }
        stats
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Append a fresh bullet built from `data`. Returns its id.
    pub fn add_bullet(
        &mut self,
        data: NewBullet,
        source_session: &str,
        half_life_days: Option<f64>,
    ) -> String {
        let bullet = Bullet::create(data, source_session, half_life_days, Utc::now());
        let id = bullet.id.clone();
        self.bullets.push(bullet);
        id
    }

    /// Deprecate a bullet, setting all three retirement markers. Returns
    /// `Ok(false)` for an unknown id. Pinned bullets refuse the transition.
    pub fn deprecate_bullet(
        &mut self,
        id: &str,
        reason: &str,
        replaced_by: Option<String>,
    ) -> Result<bool> {
        let Some(bullet) = self.find_bullet_mut(id) else {
            return Ok(false);
        };
        if bullet.pinned {
            return Err(PlaybookError::PinnedBullet(
                id.to_string(),
                bullet
                    .pinned_reason
                    .clone()
                    .unwrap_or_else(|| "pinned".to_string()),
            ));
        }
        bullet.retire(reason, replaced_by, Utc::now());
        Ok(true)
    }

    pub fn pin_bullet(&mut self, id: &str, reason: &str) -> Result<()> {
        let bullet = self
            .find_bullet_mut(id)
            .ok_or_else(|| PlaybookError::BulletNotFound(id.to_string()))?;
        bullet.pinned = true;
        bullet.pinned_reason = Some(reason.to_string());
        bullet.updated_at = Utc::now();
        Ok(())
    }

    pub fn unpin_bullet(&mut self, id: &str) -> Result<()> {
        let bullet = self
            .find_bullet_mut(id)
            .ok_or_else(|| PlaybookError::BulletNotFound(id.to_string()))?;
        bullet.pinned = false;
        bullet.pinned_reason = None;
        bullet.updated_at = Utc::now();
        Ok(())
    }

    /// Append a feedback event to a bullet. Returns false (no mutation) for
    /// an unknown id.
    pub fn record_feedback(
        &mut self,
        id: &str,
        event_type: FeedbackType,
        details: FeedbackDetails,
    ) -> bool {
        match self.find_bullet_mut(id) {
            Some(bullet) => {
                bullet.record_feedback(event_type, details, Utc::now());
                true
            }
            None => false,
        }
    }
}

fn quarantine_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!(".backup.{}", now.timestamp()));
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Cascading load
// ---------------------------------------------------------------------------

/// Load the merged view: the global playbook, overlaid with the repo
/// playbook when present (repo entries win by id, `deprecated_patterns`
/// concatenate global-first, metadata stays global), then filtered against
/// every toxic log along the cascade.
///
/// Filtering affects the merged view only; the on-disk files keep their
/// bullets until explicit removal.
pub fn load_merged(data_root: &Path, repo_root: Option<&Path>) -> Result<Playbook> {
    let mut merged = Playbook::load(&paths::playbook_path(data_root))?;

    if let Some(repo) = repo_root {
        let repo_path = paths::repo_playbook_path(repo);
        if repo_path.exists() {
            let overlay = Playbook::load(&repo_path)?;
            merge_overlay(&mut merged, overlay);
        }
    }

    let mut toxic_entries = toxic::load_toxic_log(&paths::toxic_log_path(data_root))?;
    if let Some(repo) = repo_root {
        toxic_entries.extend(toxic::load_toxic_log(&paths::repo_toxic_path(repo))?);
    }
    if !toxic_entries.is_empty() {
        merged
            .bullets
            .retain(|b| !toxic::is_suppressed(&b.content, &toxic_entries));
    }

    Ok(merged)
}

fn merge_overlay(base: &mut Playbook, overlay: Playbook) {
    for bullet in overlay.bullets {
        match base.bullets.iter_mut().find(|b| b.id == bullet.id) {
            Some(existing) => *existing = bullet,
            None => base.bullets.push(bullet),
        }
    }
    base.deprecated_patterns.extend(overlay.deprecated_patterns);
}

/// Route a bullet id to the file that currently owns it, repo preferred
/// over global. Unowned ids default to the global file.
pub fn resolve_owner(data_root: &Path, repo_root: Option<&Path>, id: &str) -> Result<PathBuf> {
    if let Some(repo) = repo_root {
        let repo_path = paths::repo_playbook_path(repo);
        if repo_path.exists() && Playbook::load(&repo_path)?.find_bullet(id).is_some() {
            return Ok(repo_path);
        }
    }
    Ok(paths::playbook_path(data_root))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bullet::{BulletState, Maturity};
    use crate::toxic::ToxicEntry;
    use tempfile::TempDir;

    fn add(pb: &mut Playbook, content: &str) -> String {
        pb.add_bullet(
            NewBullet {
                content: content.to_string(),
                category: "workflow".to_string(),
                ..Default::default()
            },
            "/x/.claude/session.jsonl",
            None,
        )
    }

    #[test]
    fn add_bullet_is_present_and_fresh() {
        let mut pb = Playbook::new("test");
        let id = add(&mut pb, "run tests before pushing");
        let b = pb.find_bullet(&id).unwrap();
        assert_eq!(b.created_at, b.updated_at);
        assert_eq!(b.state, BulletState::Draft);
        assert_eq!(b.maturity, Maturity::Candidate);
        assert!(pb.bullets.iter().filter(|x| x.id == id).count() == 1);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let pb = Playbook::load(&dir.path().join("playbook.yaml")).unwrap();
        assert!(pb.bullets.is_empty());
    }

    #[test]
    fn load_empty_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("playbook.yaml");
        std::fs::write(&path, "  \n").unwrap();
        let pb = Playbook::load(&path).unwrap();
        assert!(pb.bullets.is_empty());
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("playbook.yaml");
        std::fs::write(&path, "bullets: [not, a, playbook").unwrap();

        let pb = Playbook::load(&path).unwrap();
        assert!(pb.bullets.is_empty());
        assert!(!path.exists());

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("playbook.yaml.backup.")
            })
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("playbook.yaml");
        let mut pb = Playbook::new("global");
        let id = add(&mut pb, "pin dependency versions in ci");
        pb.record_feedback(&id, FeedbackType::Helpful, FeedbackDetails::default());
        pb.save(&path).unwrap();

        let loaded = Playbook::load(&path).unwrap();
        assert_eq!(loaded.name, "global");
        assert_eq!(loaded.bullets.len(), 1);
        assert_eq!(loaded.bullets[0].id, id);
        assert_eq!(loaded.bullets[0].helpful_count, 1);
        assert!(loaded.metadata.last_reflection.is_some());
    }

    #[test]
    fn active_bullets_excludes_retired() {
        let mut pb = Playbook::new("test");
        let keep = add(&mut pb, "keep this");
        let drop_id = add(&mut pb, "drop this");
        pb.deprecate_bullet(&drop_id, "obsolete", None).unwrap();

        let active: Vec<_> = pb.active_bullets().iter().map(|b| b.id.clone()).collect();
        assert_eq!(active, vec![keep]);
    }

    #[test]
    fn deprecate_unknown_id_returns_false() {
        let mut pb = Playbook::new("test");
        assert!(!pb.deprecate_bullet("b-missing", "x", None).unwrap());
    }

    #[test]
    fn deprecate_pinned_refuses() {
        let mut pb = Playbook::new("test");
        let id = add(&mut pb, "load-bearing rule");
        pb.pin_bullet(&id, "manually vetted").unwrap();
        let err = pb.deprecate_bullet(&id, "nope", None).unwrap_err();
        assert!(matches!(err, PlaybookError::PinnedBullet(_, _)));
        assert!(pb.find_bullet(&id).unwrap().is_active());
    }

    #[test]
    fn pin_unknown_id_errors() {
        let mut pb = Playbook::new("test");
        assert!(matches!(
            pb.pin_bullet("b-missing", "r"),
            Err(PlaybookError::BulletNotFound(_))
        ));
    }

    #[test]
    fn record_feedback_unknown_id_no_mutation() {
        let mut pb = Playbook::new("test");
        assert!(!pb.record_feedback("b-missing", FeedbackType::Helpful, FeedbackDetails::default()));
    }

    #[test]
    fn category_lookup_is_case_insensitive() {
        let mut pb = Playbook::new("test");
        add(&mut pb, "a rule");
        assert_eq!(pb.bullets_by_category("WORKFLOW").len(), 1);
    }

    #[test]
    fn merged_repo_overrides_global_by_id() {
        let data = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();

        let mut global = Playbook::new("global");
        let shared = add(&mut global, "global version of the rule");
        add(&mut global, "global-only rule");
        global.save(&paths::playbook_path(data.path())).unwrap();

        let mut overlay = Playbook::new("repo");
        let mut replacement = Bullet::create(
            NewBullet {
                content: "repo version of the rule".to_string(),
                category: "workflow".to_string(),
                ..Default::default()
            },
            "s",
            None,
            Utc::now(),
        );
        replacement.id = shared.clone();
        overlay.bullets.push(replacement);
        overlay.deprecated_patterns.push(DeprecatedPattern {
            pattern: "pattern-from-repo".to_string(),
            reason: None,
            replacement: None,
        });
        overlay.save(&paths::repo_playbook_path(repo.path())).unwrap();

        let merged = load_merged(data.path(), Some(repo.path())).unwrap();
        assert_eq!(merged.bullets.len(), 2);
        assert_eq!(
            merged.find_bullet(&shared).unwrap().content,
            "repo version of the rule"
        );
        assert_eq!(merged.deprecated_patterns.len(), 1);
        assert_eq!(merged.name, "global");
    }

    #[test]
    fn toxic_entries_suppress_merged_view_only() {
        let data = TempDir::new().unwrap();

        let mut global = Playbook::new("global");
        add(&mut global, "use global state EVERYWHERE!");
        add(&mut global, "write integration tests");
        let path = paths::playbook_path(data.path());
        global.save(&path).unwrap();

        toxic::append_toxic(
            &paths::toxic_log_path(data.path()),
            &ToxicEntry {
                id: "t-1".to_string(),
                content: "Use global state everywhere".to_string(),
                reason: None,
                forgotten_at: Utc::now(),
            },
        )
        .unwrap();

        let merged = load_merged(data.path(), None).unwrap();
        assert_eq!(merged.bullets.len(), 1);
        assert_eq!(merged.bullets[0].content, "write integration tests");

        // On-disk file untouched.
        let on_disk = Playbook::load(&path).unwrap();
        assert_eq!(on_disk.bullets.len(), 2);
    }

    #[test]
    fn resolve_owner_prefers_repo() {
        let data = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();

        let mut global = Playbook::new("global");
        let gid = add(&mut global, "global rule");
        global.save(&paths::playbook_path(data.path())).unwrap();

        let mut overlay = Playbook::new("repo");
        let rid = add(&mut overlay, "repo rule");
        overlay.save(&paths::repo_playbook_path(repo.path())).unwrap();

        let owner = resolve_owner(data.path(), Some(repo.path()), &rid).unwrap();
        assert_eq!(owner, paths::repo_playbook_path(repo.path()));

        let owner = resolve_owner(data.path(), Some(repo.path()), &gid).unwrap();
        assert_eq!(owner, paths::playbook_path(data.path()));

        // Unowned ids default to global.
        let owner = resolve_owner(data.path(), Some(repo.path()), "b-nowhere").unwrap();
        assert_eq!(owner, paths::playbook_path(data.path()));
    }

    #[test]
    fn concurrent_feedback_serializes_under_lock() {
        use crate::lock::with_lock;
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let path = Arc::new(paths::playbook_path(dir.path()));

        let mut pb = Playbook::new("global");
        let id = add(&mut pb, "rule under contention");
        pb.save(&path).unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let path = Arc::clone(&path);
            let id = id.clone();
            handles.push(std::thread::spawn(move || {
                with_lock(&path, || {
                    let mut pb = Playbook::load(&path)?;
                    assert!(pb.record_feedback(
                        &id,
                        FeedbackType::Helpful,
                        FeedbackDetails::default()
                    ));
                    pb.save(&path)
                })
                .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let pb = Playbook::load(&path).unwrap();
        let b = pb.find_bullet(&id).unwrap();
        assert_eq!(b.feedback_events.len(), 2);
        assert_eq!(b.helpful_count, 2);
    }

    #[test]
    fn stats_counts() {
        let mut pb = Playbook::new("test");
        let a = add(&mut pb, "one");
        add(&mut pb, "two");
        pb.deprecate_bullet(&a, "old", None).unwrap();
        let stats = pb.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.by_maturity["deprecated"], 1);
        assert_eq!(stats.by_category["workflow"], 2);
    }
}
