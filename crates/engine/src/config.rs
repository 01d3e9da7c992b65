//! Storage configuration
//!
//! All knobs of the indexing layer live in [`StorageConfig`]. It can be
//! built in code with chained setters or loaded from JSON; either way call
//! [`StorageConfig::validate`] (the storage builders do) before use.
//!
//! ```ignore
//! let config = StorageConfig::default()
//!     .strict_trace_id(false)
//!     .index_fetch_multiplier(5);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Seconds in a day, the default bucket window
pub const DEFAULT_BUCKET_WINDOW_SECS: u64 = 86_400;

/// Seconds of retained index data assumed by default
pub const DEFAULT_INDEX_TTL_SECS: u64 = 3 * 86_400;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Require full 128-bit trace id equality when grouping and reading
    pub strict_trace_id: bool,

    /// When false, index writes are skipped and index reads return empty
    pub search_enabled: bool,

    /// Soft bound on keys remembered per suppressed index table.
    /// Zero disables suppression.
    pub index_cache_max: usize,

    /// Seconds a suppression entry lives after its last touch
    pub index_cache_ttl_secs: u64,

    /// Width of an index bucket in seconds
    pub bucket_window_secs: u64,

    /// Each index read asks for `limit * index_fetch_multiplier` rows
    pub index_fetch_multiplier: usize,

    /// Row cap when reading one trace's spans
    pub max_trace_cols: usize,

    /// Retention of index rows in seconds, used to clamp query windows.
    /// `None` disables clamping.
    pub index_ttl_secs: Option<u64>,

    /// Seconds a name-table row is muted after being written
    pub autocomplete_ttl_secs: u64,

    /// Bound on muted name-table rows
    pub autocomplete_cardinality: usize,

    /// Span bound of the scan-based in-memory variant
    pub max_span_count: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            strict_trace_id: true,
            search_enabled: true,
            index_cache_max: 100_000,
            index_cache_ttl_secs: 60,
            bucket_window_secs: DEFAULT_BUCKET_WINDOW_SECS,
            index_fetch_multiplier: 3,
            max_trace_cols: 100_000,
            index_ttl_secs: Some(DEFAULT_INDEX_TTL_SECS),
            autocomplete_ttl_secs: 3_600,
            autocomplete_cardinality: 20_000,
            max_span_count: 500_000,
        }
    }
}

impl StorageConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StorageConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject zero limits and windows
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: u64) -> Result<()> {
            if value == 0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
            Ok(())
        }
        if self.index_cache_max > 0 {
            positive("index_cache_ttl_secs", self.index_cache_ttl_secs)?;
        }
        positive("bucket_window_secs", self.bucket_window_secs)?;
        positive("index_fetch_multiplier", self.index_fetch_multiplier as u64)?;
        positive("max_trace_cols", self.max_trace_cols as u64)?;
        if let Some(ttl) = self.index_ttl_secs {
            positive("index_ttl_secs", ttl)?;
        }
        positive("autocomplete_ttl_secs", self.autocomplete_ttl_secs)?;
        positive("autocomplete_cardinality", self.autocomplete_cardinality as u64)?;
        positive("max_span_count", self.max_span_count as u64)?;
        Ok(())
    }

    // ========================================================================
    // Builder setters
    // ========================================================================

    /// Set strict trace id mode
    pub fn strict_trace_id(mut self, strict: bool) -> Self {
        self.strict_trace_id = strict;
        self
    }

    /// Enable or disable search
    pub fn search_enabled(mut self, enabled: bool) -> Self {
        self.search_enabled = enabled;
        self
    }

    /// Set the suppression cache bound
    pub fn index_cache_max(mut self, max: usize) -> Self {
        self.index_cache_max = max;
        self
    }

    /// Set the suppression entry lifetime
    pub fn index_cache_ttl(mut self, ttl: Duration) -> Self {
        self.index_cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the bucket window
    pub fn bucket_window(mut self, window: Duration) -> Self {
        self.bucket_window_secs = window.as_secs();
        self
    }

    /// Set the over-fetch multiplier
    pub fn index_fetch_multiplier(mut self, multiplier: usize) -> Self {
        self.index_fetch_multiplier = multiplier;
        self
    }

    /// Set the per-trace row cap
    pub fn max_trace_cols(mut self, max: usize) -> Self {
        self.max_trace_cols = max;
        self
    }

    /// Set index retention, or `None` to disable clamping
    pub fn index_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.index_ttl_secs = ttl.map(|t| t.as_secs());
        self
    }

    /// Set the name-table mute period
    pub fn autocomplete_ttl(mut self, ttl: Duration) -> Self {
        self.autocomplete_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the name-table mute bound
    pub fn autocomplete_cardinality(mut self, cardinality: usize) -> Self {
        self.autocomplete_cardinality = cardinality;
        self
    }

    /// Set the span bound of the in-memory variant
    pub fn max_span_count(mut self, max: usize) -> Self {
        self.max_span_count = max;
        self
    }

    // ========================================================================
    // Typed accessors
    // ========================================================================

    /// Suppression entry lifetime
    pub fn index_cache_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.index_cache_ttl_secs)
    }

    /// Name-table mute period
    pub fn autocomplete_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.autocomplete_ttl_secs)
    }

    /// Index retention in milliseconds
    pub fn index_ttl_millis(&self) -> Option<u64> {
        self.index_ttl_secs.map(|s| s.saturating_mul(1000))
    }
}
