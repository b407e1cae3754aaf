//! Engine configuration
//!
//! A single JSON document; every field is optional and falls back to its
//! default.
//!
//! ```json
//! {
//!   "profiler": { "top_k": 5, "max_bins": 20, "quartile_method": "nearest_rank" },
//!   "cache": { "enabled": true, "capacity": 512 },
//!   "parallel_threshold": 65536,
//!   "preview_limit": 1000,
//!   "warm_on_load": false
//! }
//! ```

use crate::cache::CacheConfig;
use crate::filter::DEFAULT_PARALLEL_THRESHOLD;
use crate::profiler::ProfilerConfig;
use crate::{InsightError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Rows shown by a preview when the caller gives no limit
pub const DEFAULT_PREVIEW_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub profiler: ProfilerConfig,
    pub cache: CacheConfig,
    /// Row count at which mask refinement goes parallel
    pub parallel_threshold: usize,
    pub preview_limit: usize,
    /// Profile every column as soon as a dataset is loaded
    pub warm_on_load: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profiler: ProfilerConfig::default(),
            cache: CacheConfig::default(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            warm_on_load: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.profiler.max_bins == 0 {
            return Err(InsightError::ConfigError(
                "profiler.max_bins must be at least 1".to_string(),
            ));
        }
        if self.profiler.top_k == 0 {
            return Err(InsightError::ConfigError(
                "profiler.top_k must be at least 1".to_string(),
            ));
        }
        if self.parallel_threshold == 0 {
            return Err(InsightError::ConfigError(
                "parallel_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
