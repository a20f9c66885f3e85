//! Age-based eviction of gallery records.

use crate::gallery::{GalleryError, VectorGallery};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RETENTION_HORIZON: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Records older than this are evicted.
    pub horizon: Duration,
    /// How often the sweeper runs.
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            horizon: DEFAULT_RETENTION_HORIZON,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RetentionPolicy {
    /// Records created strictly before this instant are expired.
    pub fn cutoff(&self, now_millis: i64) -> i64 {
        let horizon = i64::try_from(self.horizon.as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_sub(horizon)
    }
}

/// Evict every record older than the policy horizon. Returns the number removed.
pub fn sweep<G>(gallery: &mut G, policy: &RetentionPolicy, now_millis: i64) -> Result<usize, GalleryError>
where
    G: VectorGallery + ?Sized,
{
    let cutoff = policy.cutoff(now_millis);
    let removed = gallery.delete_older_than(cutoff)?;
    if removed > 0 {
        tracing::info!(removed, cutoff, "evicted expired identity records");
    } else {
        tracing::debug!(cutoff, "no expired identity records");
    }
    Ok(removed)
}
