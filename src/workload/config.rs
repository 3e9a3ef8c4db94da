use crate::core::{Result, WorkloadError};
use crate::rotation::TimeWindow;
use crate::store::DEFAULT_QUERY_SOCKET_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest primary pool the dispatcher accepts. Below this the per-kind
/// shares of low-weight kinds round down to zero.
pub const MIN_POOL_CAPACITY: usize = 50;
pub const DEFAULT_POOL_CAPACITY: usize = 500;
pub const DEFAULT_ROTATION_CAPACITY: usize = 100;
pub const DEFAULT_KEY_RANGE: i64 = 1000;
pub const DEFAULT_MAP_BIN: &str = "mapBin";

/// Bin specs written each cycle when none are configured.
pub const DEFAULT_BIN_SPECS: [&str; 3] = [
    "junk:str:8,randInt:int:200,color:blue",
    "junk:str:8,randInt:int:200,color:red",
    "junk:str:8,randInt:int:200,color:green",
];

/// Per-kind share of the primary pool, as divisors of its capacity.
///
/// Each cycle issues `capacity / divisor` tasks of a kind; a divisor of zero
/// disables the kind. `write` applies to every configured bin spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkloadMix {
    pub write: usize,
    pub map_write: usize,
    pub udf: usize,
    pub read: usize,
    pub query: usize,
    pub aggregate: usize,
}

impl Default for WorkloadMix {
    fn default() -> Self {
        Self {
            write: 100,
            map_write: 50,
            udf: 10,
            read: 50,
            query: 150,
            aggregate: 100,
        }
    }
}

impl WorkloadMix {
    pub fn count(capacity: usize, divisor: usize) -> usize {
        capacity.checked_div(divisor).unwrap_or(0)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| WorkloadError::Config(format!("invalid workload mix: {}", err)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            WorkloadError::Config(format!("cannot read mix file '{}': {}", path.display(), err))
        })?;
        Self::from_json(&text)
    }
}

/// Secondary-index query settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    /// Issue query and aggregate tasks.
    pub enabled: bool,
    pub short: bool,
    /// Equality filter target. Without it queries look for records whose
    /// map bin holds the sentinel key.
    pub index_bin: Option<String>,
    pub index_value: i64,
    /// A query whose next record takes longer than this is abandoned.
    pub socket_timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            short: false,
            index_bin: None,
            index_value: 0,
            socket_timeout: DEFAULT_QUERY_SOCKET_TIMEOUT,
        }
    }
}

/// Immutable workload settings, built once at startup.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Primary keys are drawn from `[0, key_range)`.
    pub key_range: i64,
    pub bin_specs: Vec<String>,
    pub capacity: usize,
    pub rotation_capacity: usize,
    pub pause: Duration,
    pub query: QueryConfig,
    pub udf_enabled: bool,
    pub mix: WorkloadMix,
    pub map_bin: String,
    pub window: TimeWindow,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            key_range: DEFAULT_KEY_RANGE,
            bin_specs: DEFAULT_BIN_SPECS.iter().map(|s| s.to_string()).collect(),
            capacity: DEFAULT_POOL_CAPACITY,
            rotation_capacity: DEFAULT_ROTATION_CAPACITY,
            pause: Duration::from_secs(1),
            query: QueryConfig::default(),
            udf_enabled: false,
            mix: WorkloadMix::default(),
            map_bin: DEFAULT_MAP_BIN.to_string(),
            window: TimeWindow::default(),
        }
    }
}

impl WorkloadConfig {
    pub fn key_range(mut self, key_range: i64) -> Self {
        self.key_range = key_range;
        self
    }

    /// Replace the bin specs. An empty list keeps the defaults.
    pub fn bin_specs(mut self, specs: Vec<String>) -> Self {
        if !specs.is_empty() {
            self.bin_specs = specs;
        }
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn rotation_capacity(mut self, capacity: usize) -> Self {
        self.rotation_capacity = capacity;
        self
    }

    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    pub fn udf_enabled(mut self, enabled: bool) -> Self {
        self.udf_enabled = enabled;
        self
    }

    pub fn mix(mut self, mix: WorkloadMix) -> Self {
        self.mix = mix;
        self
    }

    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity < MIN_POOL_CAPACITY {
            return Err(WorkloadError::Config(format!(
                "pool capacity {} is below the minimum of {}",
                self.capacity, MIN_POOL_CAPACITY
            )));
        }

        if self.rotation_capacity == 0 {
            return Err(WorkloadError::Config(
                "rotation capacity must be > 0".to_string(),
            ));
        }

        if self.key_range <= 0 {
            return Err(WorkloadError::Config(format!(
                "key range must be > 0, got {}",
                self.key_range
            )));
        }

        if self.query.socket_timeout.is_zero() {
            return Err(WorkloadError::Config(
                "query socket timeout must be > 0".to_string(),
            ));
        }

        if self.window.window_secs <= 0 {
            return Err(WorkloadError::Config(
                "rotation window must be > 0 seconds".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mix_counts() {
        let mix = WorkloadMix::default();
        assert_eq!(WorkloadMix::count(500, mix.write), 5);
        assert_eq!(WorkloadMix::count(500, mix.map_write), 10);
        assert_eq!(WorkloadMix::count(500, mix.udf), 50);
        assert_eq!(WorkloadMix::count(500, mix.query), 3);
        assert_eq!(WorkloadMix::count(500, 0), 0);
    }

    #[test]
    fn test_mix_from_json_fills_defaults() {
        let mix = WorkloadMix::from_json(r#"{"read": 5, "query": 0}"#).unwrap();
        assert_eq!(mix.read, 5);
        assert_eq!(mix.query, 0);
        assert_eq!(mix.write, 100);

        assert!(matches!(
            WorkloadMix::from_json("{not json"),
            Err(WorkloadError::Config(_))
        ));
    }

    #[test]
    fn test_mix_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.json");
        std::fs::write(&path, r#"{"write": 25}"#).unwrap();
        assert_eq!(WorkloadMix::from_file(&path).unwrap().write, 25);
        assert!(WorkloadMix::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_capacity_below_minimum_is_rejected() {
        let err = WorkloadConfig::default().capacity(49).validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(WorkloadConfig::default().capacity(50).validate().is_ok());
    }

    #[test]
    fn test_other_validation() {
        assert!(WorkloadConfig::default().key_range(0).validate().is_err());
        assert!(WorkloadConfig::default().rotation_capacity(0).validate().is_err());

        let query = QueryConfig {
            socket_timeout: Duration::ZERO,
            ..QueryConfig::default()
        };
        assert!(WorkloadConfig::default().query(query).validate().is_err());
    }

    #[test]
    fn test_empty_bin_specs_keep_defaults() {
        let config = WorkloadConfig::default().bin_specs(Vec::new());
        assert_eq!(config.bin_specs.len(), 3);
        let config = WorkloadConfig::default().bin_specs(vec!["age:24".into()]);
        assert_eq!(config.bin_specs, vec!["age:24".to_string()]);
    }
}
