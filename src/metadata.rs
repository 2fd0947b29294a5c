//! Sidecar metadata for downloaded artifacts.
//!
//! Each managed download keeps a small JSON file next to its cache entry
//! recording when it was last fetched and the server's ETag. The stamp
//! drives the periodic-refresh schedule and the `If-None-Match` header;
//! losing it only costs one unconditional fetch.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Freshness record for one cached download.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStamp {
    /// Unix seconds of the last successful fetch; `None` = never fetched.
    pub fetched_at: Option<u64>,
    /// ETag from the last 200 response.
    pub etag: Option<String>,
}

impl CacheStamp {
    /// A stamp for a fetch that just completed.
    pub fn now(etag: Option<String>) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            fetched_at: Some(secs),
            etag,
        }
    }

    /// Read a stamp, yielding the default (stale, no ETag) when the file
    /// is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// True when no fetch is recorded or `interval` has elapsed since it.
    pub fn is_stale(&self, interval: Duration) -> bool {
        let Some(fetched) = self.fetched_at else {
            return true;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(fetched) >= interval.as_secs()
    }

    pub fn fetched_at(&self) -> Option<SystemTime> {
        self.fetched_at.map(|s| UNIX_EPOCH + Duration::from_secs(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.meta");
        let stamp = CacheStamp::now(Some("\"abc123\"".to_string()));
        stamp.save(&path).unwrap();

        let loaded = CacheStamp::load(&path);
        assert_eq!(loaded.fetched_at, stamp.fetched_at);
        assert_eq!(loaded.etag.as_deref(), Some("\"abc123\""));
    }

    #[test]
    fn missing_file_is_stale() {
        let stamp = CacheStamp::load(Path::new("/nonexistent/rules.meta"));
        assert!(stamp.fetched_at.is_none());
        assert!(stamp.is_stale(Duration::from_secs(1)));
    }

    #[test]
    fn staleness_thresholds() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let stamp = CacheStamp {
            fetched_at: Some(now - 3600),
            etag: None,
        };
        assert!(stamp.is_stale(Duration::from_secs(1800)));
        assert!(!stamp.is_stale(Duration::from_secs(7200)));
    }

    #[test]
    fn garbage_file_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.meta");
        fs::write(&path, "{not json").unwrap();
        let stamp = CacheStamp::load(&path);
        assert!(stamp.fetched_at.is_none());
        assert!(stamp.etag.is_none());
    }
}
