//! Optional embedding support. The core does not run models; it accepts
//! any provider implementing `EmbeddingProvider` and keeps a bullet-id to
//! vector cache at `embeddings/bullets.json`, updated under its own lock.

use crate::error::Result;
use crate::lock::with_lock;
use crate::{io, paths};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Hook for a `text -> vector` capability. Returning `None` means the
/// provider cannot embed right now; callers fall back to keyword overlap.
pub trait EmbeddingProvider {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingCache {
    #[serde(default)]
    pub vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingCache {
    pub fn load(data_root: &Path) -> Result<Self> {
        let path = paths::embeddings_path(data_root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&data) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                tracing::warn!("embedding cache unreadable, starting fresh: {e}");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, data_root: &Path) -> Result<()> {
        let path = paths::embeddings_path(data_root);
        with_lock(&path, || {
            io::atomic_write(&path, serde_json::to_string(self)?.as_bytes())
        })
    }

    pub fn get(&self, bullet_id: &str) -> Option<&Vec<f32>> {
        self.vectors.get(bullet_id)
    }

    pub fn insert(&mut self, bullet_id: impl Into<String>, vector: Vec<f32>) {
        self.vectors.insert(bullet_id.into(), vector);
    }

    /// Drop vectors for bullets that no longer exist.
    pub fn retain_ids(&mut self, live_ids: &std::collections::HashSet<String>) {
        self.vectors.retain(|id, _| live_ids.contains(id));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
