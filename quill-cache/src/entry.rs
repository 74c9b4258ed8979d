//! Cache entries and their integrity digest

use quill_core::{Correction, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Separator between word and context in the digest input, so that
/// ("ab", "c") and ("a", "bc") never collide.
const DIGEST_SEPARATOR: u8 = 0x1f;

/// One stored correction, keyed by word in the cache map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub word: String,
    /// Context the correction was produced for
    pub context: String,
    pub correction: String,
    pub was_corrected: bool,
    pub created_at: Timestamp,
    /// Hex SHA-256 over (word, context)
    pub digest: String,
}

impl CacheEntry {
    pub fn new(
        word: impl Into<String>,
        context: impl Into<String>,
        correction: impl Into<String>,
        was_corrected: bool,
        created_at: Timestamp,
    ) -> Self {
        let word = word.into();
        let context = context.into();
        let digest = digest_of(&word, &context);
        Self {
            word,
            context,
            correction: correction.into(),
            was_corrected,
            created_at,
            digest,
        }
    }

    /// Whether the stored digest matches the one recomputed for a lookup.
    pub fn verifies(&self, word: &str, context: &str) -> bool {
        self.digest == digest_of(word, context)
    }

    pub fn is_expired(&self, ttl: Duration, now: Timestamp) -> bool {
        now.signed_duration_since(self.created_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }

    pub fn to_correction(&self) -> Correction {
        Correction::new(self.correction.clone(), self.was_corrected)
    }
}

/// Keyless integrity digest of a (word, context) pair.
pub fn digest_of(word: &str, context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(word.as_bytes());
    hasher.update([DIGEST_SEPARATOR]);
    hasher.update(context.as_bytes());
    hex::encode(hasher.finalize())
}
