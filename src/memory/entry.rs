//! Stored entries, their metadata and the substrate clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::memory::hypervector::HyperVector;

/// Bookkeeping carried by every stored memory. Times are Unix milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub timestamp: u64,
    pub access_count: u64,
    pub last_accessed: u64,
    pub strength: f64,
    pub context: Option<String>,
    pub modality: Option<String>,
    pub tags: Vec<String>,
}

impl MemoryMetadata {
    /// Fresh metadata stamped at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            timestamp: now,
            access_count: 0,
            last_accessed: now,
            strength: 1.0,
            context: None,
            modality: None,
            tags: Vec::new(),
        }
    }

    /// Defaults at `now` with every `Some` field of `overrides` applied.
    pub fn merged(now: u64, overrides: Option<MetadataOverrides>) -> Self {
        let mut meta = Self::new(now);
        if let Some(o) = overrides {
            if let Some(v) = o.timestamp {
                meta.timestamp = v;
            }
            if let Some(v) = o.access_count {
                meta.access_count = v;
            }
            if let Some(v) = o.last_accessed {
                meta.last_accessed = v;
            }
            if let Some(v) = o.strength {
                meta.strength = v.max(0.0);
            }
            meta.context = o.context.or(meta.context);
            meta.modality = o.modality.or(meta.modality);
            if let Some(tags) = o.tags {
                meta.tags = tags;
            }
        }
        meta
    }
}

/// Caller-supplied fields merged over defaults on store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataOverrides {
    pub timestamp: Option<u64>,
    pub access_count: Option<u64>,
    pub last_accessed: Option<u64>,
    pub strength: Option<f64>,
    pub context: Option<String>,
    pub modality: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl MetadataOverrides {
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn modality(mut self, modality: impl Into<String>) -> Self {
        self.modality = Some(modality.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn last_accessed(mut self, at: u64) -> Self {
        self.last_accessed = Some(at);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub vector: HyperVector,
    pub metadata: MemoryMetadata,
}

/// One retrieval hit. `entry` is a snapshot taken after bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub entry: MemoryEntry,
    pub similarity: f32,
    /// 1-based.
    pub rank: usize,
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Source of "now" in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_ms)
            .unwrap_or(0)
    }
}

/// Settable clock; clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = duration_ms(by);
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(by)));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let meta = MemoryMetadata::merged(1234, None);
        assert_eq!(meta.timestamp, 1234);
        assert_eq!(meta.last_accessed, 1234);
        assert_eq!(meta.access_count, 0);
        assert_eq!(meta.strength, 1.0);
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn test_overrides_merge() {
        let overrides = MetadataOverrides::default()
            .context("kitchen")
            .tags(["food", "morning"])
            .strength(2.5);
        let meta = MemoryMetadata::merged(10, Some(overrides));
        assert_eq!(meta.context.as_deref(), Some("kitchen"));
        assert_eq!(meta.tags, vec!["food".to_string(), "morning".to_string()]);
        assert_eq!(meta.strength, 2.5);
        assert_eq!(meta.timestamp, 10);
        assert!(meta.modality.is_none());
    }

    #[test]
    fn test_negative_strength_clamped() {
        let meta = MemoryMetadata::merged(0, Some(MetadataOverrides::default().strength(-1.0)));
        assert_eq!(meta.strength, 0.0);
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(100);
        let view = clock.clone();
        clock.advance(Duration::from_secs(1));
        assert_eq!(view.now_ms(), 1100);
        view.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::from_secs(1 << 62)), u64::MAX);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_manual_clock_advance_saturates() {
        let clock = ManualClock::new(10);
        clock.advance(Duration::from_secs(1 << 62));
        assert_eq!(clock.now_ms(), u64::MAX);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_ms(), u64::MAX);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01 in ms.
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
