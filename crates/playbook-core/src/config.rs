use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Anthropic,
    Openai,
    Ollama,
    None,
}

// ---------------------------------------------------------------------------
// ScoringConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_half_life")]
    pub decay_half_life_days: f64,
    /// Harmful evidence degrades trust faster than helpful evidence grows it.
    #[serde(default = "default_harmful_multiplier")]
    pub harmful_multiplier: f64,
    #[serde(default = "default_min_feedback_for_active")]
    pub min_feedback_for_active: f64,
    #[serde(default = "default_min_helpful_for_proven")]
    pub min_helpful_for_proven: f64,
    #[serde(default = "default_max_harmful_ratio_for_proven")]
    pub max_harmful_ratio_for_proven: f64,
    #[serde(default = "default_stale_days")]
    pub stale_days: i64,
}

fn default_half_life() -> f64 {
    90.0
}

fn default_harmful_multiplier() -> f64 {
    4.0
}

fn default_min_feedback_for_active() -> f64 {
    3.0
}

fn default_min_helpful_for_proven() -> f64 {
    5.0
}

fn default_max_harmful_ratio_for_proven() -> f64 {
    0.1
}

fn default_stale_days() -> i64 {
    90
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            decay_half_life_days: default_half_life(),
            harmful_multiplier: default_harmful_multiplier(),
            min_feedback_for_active: default_min_feedback_for_active(),
            min_helpful_for_proven: default_min_helpful_for_proven(),
            max_harmful_ratio_for_proven: default_max_harmful_ratio_for_proven(),
            stale_days: default_stale_days(),
        }
    }
}

// ---------------------------------------------------------------------------
// SanitizationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    #[default]
    Info,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_patterns: Vec<String>,
    #[serde(default)]
    pub audit_log: bool,
    #[serde(default)]
    pub audit_level: AuditLevel,
}

fn default_true() -> bool {
    true
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extra_patterns: Vec::new(),
            audit_log: false,
            audit_level: AuditLevel::Info,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Override for the global playbook location. Defaults to
    /// `<data root>/playbook.yaml` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_path: Option<PathBuf>,
    /// Name or path of the external session-search tool.
    #[serde(default = "default_cass_path")]
    pub cass_path: String,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default = "default_dedup_threshold")]
    pub dedup_similarity_threshold: f64,
    #[serde(default = "default_prune_threshold")]
    pub prune_harmful_threshold: f64,

    #[serde(default = "default_true")]
    pub validation_enabled: bool,
    #[serde(default = "default_validation_lookback")]
    pub validation_lookback_days: i64,

    #[serde(default = "default_max_bullets")]
    pub max_bullets_in_context: usize,
    #[serde(default = "default_max_history")]
    pub max_history_in_context: usize,
    #[serde(default = "default_session_lookback")]
    pub session_lookback_days: i64,

    #[serde(default)]
    pub sanitization: SanitizationConfig,

    #[serde(default)]
    pub semantic_search_enabled: bool,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_tool_timeout")]
    pub search_timeout_seconds: u64,
    #[serde(default = "default_tool_timeout")]
    pub export_timeout_seconds: u64,
}

fn default_cass_path() -> String {
    "cass".to_string()
}

fn default_model() -> String {
    "claude-opus-4-6".to_string()
}

fn default_dedup_threshold() -> f64 {
    0.85
}

fn default_prune_threshold() -> f64 {
    2.0
}

fn default_validation_lookback() -> i64 {
    30
}

fn default_max_bullets() -> usize {
    10
}

fn default_max_history() -> usize {
    5
}

fn default_session_lookback() -> i64 {
    7
}

fn default_embedding_model() -> String {
    "none".to_string()
}

fn default_tool_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        // A config file with no keys yields exactly the defaults.
        serde_yaml::from_str("{}").expect("empty config deserializes")
    }
}

impl Config {
    /// Load from `<root>/config.yaml`; a missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Resolved global playbook path.
    pub fn playbook_path(&self, root: &Path) -> PathBuf {
        self.playbook_path
            .clone()
            .unwrap_or_else(|| paths::playbook_path(root))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.scoring.decay_half_life_days <= 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "scoring.decay_half_life_days must be positive, got {}",
                    self.scoring.decay_half_life_days
                ),
            });
        }
        if self.scoring.harmful_multiplier < 1.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "scoring.harmful_multiplier={} weights harmful evidence below helpful",
                    self.scoring.harmful_multiplier
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.scoring.max_harmful_ratio_for_proven) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "scoring.max_harmful_ratio_for_proven must be in [0, 1], got {}",
                    self.scoring.max_harmful_ratio_for_proven
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.dedup_similarity_threshold)
            || self.dedup_similarity_threshold == 0.0
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "dedup_similarity_threshold must be in (0, 1], got {}",
                    self.dedup_similarity_threshold
                ),
            });
        }
        if self.prune_harmful_threshold < 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "prune_harmful_threshold must be >= 0, got {}",
                    self.prune_harmful_threshold
                ),
            });
        }
        if self.max_bullets_in_context == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "max_bullets_in_context=0 means context briefings carry no rules"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.cass_path, "cass");
        assert_eq!(cfg.scoring.harmful_multiplier, 4.0);
        assert_eq!(cfg.scoring.decay_half_life_days, 90.0);
        assert_eq!(cfg.dedup_similarity_threshold, 0.85);
        assert_eq!(cfg.max_bullets_in_context, 10);
        assert_eq!(cfg.session_lookback_days, 7);
        assert_eq!(cfg.embedding_model, "none");
        assert!(cfg.validation_enabled);
        assert!(cfg.sanitization.enabled);
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.max_bullets_in_context, 10);
    }

    #[test]
    fn roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.scoring.harmful_multiplier = 6.0;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.scoring.harmful_multiplier, 6.0);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "scoring:\n  harmful_multiplier: 2.5\nmax_bullets_in_context: 20\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.scoring.harmful_multiplier, 2.5);
        assert_eq!(cfg.scoring.decay_half_life_days, 90.0);
        assert_eq!(cfg.max_bullets_in_context, 20);
    }

    #[test]
    fn provider_snake_case() {
        let cfg: Config = serde_yaml::from_str("provider: openai\n").unwrap();
        assert_eq!(cfg.provider, Provider::Openai);
    }

    #[test]
    fn validate_clean_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_bad_thresholds() {
        let mut cfg = Config::default();
        cfg.scoring.decay_half_life_days = -1.0;
        cfg.dedup_similarity_threshold = 1.5;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Error));
    }

    #[test]
    fn validate_warns_on_soft_misconfig() {
        let mut cfg = Config::default();
        cfg.scoring.harmful_multiplier = 0.5;
        cfg.max_bullets_in_context = 0;
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Warning));
    }

    #[test]
    fn playbook_path_override() {
        let mut cfg = Config::default();
        assert_eq!(
            cfg.playbook_path(Path::new("/data")),
            PathBuf::from("/data/playbook.yaml")
        );
        cfg.playbook_path = Some(PathBuf::from("/elsewhere/pb.yaml"));
        assert_eq!(
            cfg.playbook_path(Path::new("/data")),
            PathBuf::from("/elsewhere/pb.yaml")
        );
    }
}
