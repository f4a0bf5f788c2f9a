use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read from `ROOMSCHED_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding `rooms.wal`.
    pub data_dir: PathBuf,
    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
    /// How often cached room activity flags are recomputed.
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let data_dir = lookup("ROOMSCHED_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let compact_threshold = lookup("ROOMSCHED_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        let sweep_interval = lookup("ROOMSCHED_SWEEP_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);
        Self {
            data_dir,
            compact_threshold,
            sweep_interval,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("rooms.wal")
    }
}
