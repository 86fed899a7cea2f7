use crate::similarity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BulletKind {
    #[default]
    WorkflowRule,
    AntiPattern,
    StackPattern,
    ToolConfig,
}

/// Coarse polarity of a bullet, denormalized alongside `kind` and
/// `is_negative` so all three can be queried independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    #[default]
    Rule,
    AntiPattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Global,
    Workspace,
    Language,
    Framework,
    Task,
}

impl std::str::FromStr for Scope {
    type Err = crate::error::PlaybookError;
    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "global" => Ok(Scope::Global),
            "workspace" => Ok(Scope::Workspace),
            "language" => Ok(Scope::Language),
            "framework" => Ok(Scope::Framework),
            "task" => Ok(Scope::Task),
            _ => Err(crate::error::PlaybookError::InvalidScope(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BulletState {
    #[default]
    Draft,
    Active,
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Maturity {
    #[default]
    Candidate,
    Established,
    Proven,
    Deprecated,
}

impl Maturity {
    /// Promotion rank: candidate < established < proven. Deprecated is a
    /// terminal state outside the promotion ladder.
    pub fn rank(self) -> u8 {
        match self {
            Maturity::Candidate => 0,
            Maturity::Established => 1,
            Maturity::Proven => 2,
            Maturity::Deprecated => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Maturity::Candidate => "candidate",
            Maturity::Established => "established",
            Maturity::Proven => "proven",
            Maturity::Deprecated => "deprecated",
        }
    }
}

// ---------------------------------------------------------------------------
// Feedback events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Helpful,
    Harmful,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    #[serde(rename = "type")]
    pub event_type: FeedbackType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Optional fields accompanying a recorded feedback event.
#[derive(Debug, Clone, Default)]
pub struct FeedbackDetails {
    pub timestamp: Option<DateTime<Utc>>,
    pub session_path: Option<String>,
    pub reason: Option<String>,
    pub context: Option<String>,
}

// ---------------------------------------------------------------------------
// Bullet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bullet {
    pub id: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub kind: BulletKind,
    #[serde(rename = "type", default)]
    pub rule_type: RuleType,
    #[serde(default)]
    pub is_negative: bool,

    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    #[serde(default)]
    pub state: BulletState,
    #[serde(default)]
    pub maturity: Maturity,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_reason: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_sessions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback_events: Vec<FeedbackEvent>,
    #[serde(default)]
    pub helpful_count: u32,
    #[serde(default)]
    pub harmful_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_decay_half_life_days: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Input for creating a bullet. Everything beyond content and category has
/// a sensible default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBullet {
    pub content: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BulletKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Initial lifecycle state, e.g. `active` when the evidence gate
    /// auto-accepted the rule. Defaults to `draft`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_state: Option<BulletState>,
}

pub fn new_bullet_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("b-{}", &hex[..12])
}

/// Derive the authoring agent from a session path. The known agent homes
/// leave recognizable markers in their transcript paths.
pub fn derive_source_agent(session_path: &str) -> &'static str {
    if session_path.contains(".claude") {
        "claude-code"
    } else if session_path.contains(".cursor") {
        "cursor"
    } else if session_path.contains(".codex") {
        "codex"
    } else if session_path.contains(".aider") {
        "aider"
    } else {
        "unknown"
    }
}

impl Bullet {
    /// Construct a fresh bullet in draft/candidate state with zero feedback.
    pub fn create(
        data: NewBullet,
        source_session: &str,
        half_life_days: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        let kind = data.kind.unwrap_or_default();
        let is_anti = kind == BulletKind::AntiPattern;
        let content_hash = similarity::hash_content(&data.content);
        Self {
            id: new_bullet_id(),
            content: data.content,
            category: data.category,
            kind,
            rule_type: if is_anti {
                RuleType::AntiPattern
            } else {
                RuleType::Rule
            },
            is_negative: is_anti,
            scope: data.scope.unwrap_or_default(),
            scope_key: data.scope_key,
            workspace: data.workspace,
            state: data.suggested_state.unwrap_or_default(),
            maturity: Maturity::Candidate,
            pinned: false,
            pinned_reason: None,
            deprecated: false,
            deprecated_at: None,
            deprecation_reason: None,
            replaced_by: None,
            source_sessions: vec![source_session.to_string()],
            source_agents: vec![derive_source_agent(source_session).to_string()],
            tags: data.tags,
            feedback_events: Vec::new(),
            helpful_count: 0,
            harmful_count: 0,
            created_at: now,
            updated_at: now,
            last_validated_at: None,
            confidence_decay_half_life_days: half_life_days,
            embedding: None,
            content_hash: Some(content_hash),
        }
    }

    /// A bullet is inactive once any of the three retirement markers is set.
    pub fn is_active(&self) -> bool {
        !self.deprecated
            && self.state != BulletState::Retired
            && self.maturity != Maturity::Deprecated
    }

    pub fn is_anti_pattern(&self) -> bool {
        self.is_negative || self.kind == BulletKind::AntiPattern
    }

    /// Append a feedback event, keeping the denormalized counters and the
    /// validation/update timestamps consistent.
    pub fn record_feedback(
        &mut self,
        event_type: FeedbackType,
        details: FeedbackDetails,
        now: DateTime<Utc>,
    ) {
        let timestamp = details.timestamp.unwrap_or(now);
        self.feedback_events.push(FeedbackEvent {
            event_type,
            timestamp,
            session_path: details.session_path,
            reason: details.reason,
            context: details.context,
        });
        match event_type {
            FeedbackType::Helpful => {
                self.helpful_count += 1;
                self.last_validated_at = Some(now);
            }
            FeedbackType::Harmful => self.harmful_count += 1,
        }
        self.updated_at = now;
    }

    /// Set all three retirement markers together so they always agree.
    pub fn retire(&mut self, reason: &str, replaced_by: Option<String>, now: DateTime<Utc>) {
        self.deprecated = true;
        self.deprecated_at = Some(now);
        self.deprecation_reason = Some(reason.to_string());
        self.replaced_by = replaced_by;
        self.state = BulletState::Retired;
        self.maturity = Maturity::Deprecated;
        self.updated_at = now;
    }

    /// Rebuild the denormalized counters from the event list.
    pub fn regenerate_counters(&mut self) {
        self.helpful_count = self
            .feedback_events
            .iter()
            .filter(|e| e.event_type == FeedbackType::Helpful)
            .count() as u32;
        self.harmful_count = self
            .feedback_events
            .iter()
            .filter(|e| e.event_type == FeedbackType::Harmful)
            .count() as u32;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
