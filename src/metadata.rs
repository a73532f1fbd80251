//! Per-entry metadata records.
//!
//! Metadata rides alongside each stored vector and feeds scoring and
//! post-filtering only; it never affects graph topology. All fields are
//! explicit optionals with documented defaults, validated once at the
//! insert boundary.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, VaultError};

/// Metadata attached to a stored vector.
///
/// Defaults: no category/topic/content type, importance 5, empty tags,
/// `created_at`/`updated_at` set to the current wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub category: Option<String>,
    pub topic: Option<String>,
    /// Importance on a 1..=10 scale; 5 is neutral.
    pub importance: u8,
    pub content_type: Option<String>,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds; bumped by metadata updates.
    pub updated_at: u64,
    pub tags: Vec<String>,
}

impl Default for MemoryMetadata {
    fn default() -> Self {
        let now = now_secs();
        Self {
            category: None,
            topic: None,
            importance: 5,
            content_type: None,
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        }
    }
}

impl MemoryMetadata {
    /// Validate the record at the insert boundary.
    ///
    /// Importance must stay on the 1..=10 scale; timestamps must not run
    /// backwards relative to each other.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.importance) {
            return Err(VaultError::InvalidParameter(format!(
                "importance must be in 1..=10, got {}",
                self.importance
            )));
        }
        if self.updated_at < self.created_at {
            return Err(VaultError::InvalidParameter(
                "updated_at precedes created_at".to_string(),
            ));
        }
        Ok(())
    }

    /// Age of the entry in days relative to `now` (unix seconds).
    #[must_use]
    pub fn age_days(&self, now: u64) -> f64 {
        let age_secs = now.saturating_sub(self.created_at);
        age_secs as f64 / 86_400.0
    }
}

/// Current wall clock as unix seconds.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
