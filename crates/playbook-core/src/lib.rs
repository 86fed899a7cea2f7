//! Procedural-memory playbook for coding agents.
//!
//! Session transcripts from external agents are distilled into reusable
//! rules ("bullets") held in file-backed playbooks. Feedback decays over
//! time; rules mature, get demoted, invert into anti-patterns, or retire.
//! Everything that mutates a file does so under a per-file advisory lock
//! and an atomic write.

pub mod bullet;
pub mod config;
pub mod context;
pub mod curator;
pub mod diary;
pub mod embedding;
pub mod error;
pub mod gate;
pub mod history;
pub mod io;
pub mod lock;
pub mod outcome;
pub mod paths;
pub mod playbook;
pub mod processed;
pub mod reflection;
pub mod sanitize;
pub mod scoring;
pub mod similarity;
pub mod toxic;
pub mod validator;

pub use bullet::{Bullet, BulletKind, BulletState, FeedbackType, Maturity, NewBullet, Scope};
pub use config::Config;
pub use curator::{CurationResult, PlaybookDelta};
pub use error::{PlaybookError, Result};
pub use playbook::Playbook;
