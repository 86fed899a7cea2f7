//! Content hashing and similarity primitives used for duplicate detection,
//! toxic-content matching, and coarse relevance.

use crate::bullet::Bullet;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Common English words excluded from token comparisons. Matching on these
/// inflates Jaccard between unrelated rules.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "with", "that", "this", "have", "has", "was",
    "were", "will", "would", "should", "could", "can", "not", "but", "all",
    "when", "use", "using", "from", "you", "your", "its", "into", "than",
    "then", "they", "them", "there", "what", "which", "while", "where", "how",
    "any", "each", "been", "being", "also", "only", "over", "such", "some",
    "more", "most", "other", "after", "before", "because", "does", "done",
    "always", "never", "make", "sure", "avoid", "instead",
];

/// Normalize content for hashing: trimmed, lowercased, runs of whitespace
/// collapsed to single spaces.
fn normalize(content: &str) -> String {
    content
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable SHA-256 hex digest of the normalized content. Two strings that
/// differ only by case or whitespace hash identically.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Tokenize for Jaccard: lowercased alphanumeric words of length >= 3,
/// minus stop words.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Token Jaccard similarity in [0, 1]. Empty token sets yield 0.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    intersection as f64 / union as f64
}

/// Ordered keyword extraction: the tokens of `tokenize`, deduplicated and
/// in first-seen order. Used to build search queries and relevance scores.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

/// Cosine similarity between two embedding vectors. Returns 0 when either
/// vector is empty or the lengths mismatch.
pub fn cosine(u: &[f32], v: &[f32]) -> f64 {
    if u.is_empty() || v.is_empty() || u.len() != v.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut nu = 0.0f64;
    let mut nv = 0.0f64;
    for (a, b) in u.iter().zip(v.iter()) {
        dot += f64::from(*a) * f64::from(*b);
        nu += f64::from(*a) * f64::from(*a);
        nv += f64::from(*b) * f64::from(*b);
    }
    if nu == 0.0 || nv == 0.0 {
        return 0.0;
    }
    dot / (nu.sqrt() * nv.sqrt())
}

/// Scan all active bullets and return the index and score of the single
/// highest-Jaccard match at or above `threshold`. Ties break to the earliest
/// bullet in insertion order.
pub fn find_similar_bullet(
    bullets: &[Bullet],
    content: &str,
    threshold: f64,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, bullet) in bullets.iter().enumerate() {
        if !bullet.is_active() {
            continue;
        }
        let score = jaccard(&bullet.content, content);
        if score >= threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((i, score));
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
