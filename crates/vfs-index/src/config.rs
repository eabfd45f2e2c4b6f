//! Index settings and build tunables.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::thread::available_parallelism;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::paths::path_is_ignored;

pub const DEFAULT_MAX_INDEX_DEPTH: usize = 20;
pub const DEFAULT_SEARCH_MODE: &str = "memory";

/// Queue length that forces a drain regardless of the tick schedule.
pub const HIGH_WATER_MARK: usize = 10_000;
/// Ticks after which queued items are drained even when the queue is small.
pub const STALE_TICKS: u32 = 3;
pub const DISPATCH_CAPACITY: usize = 1024;
pub const WORKERS_PER_CORE: usize = 8;
pub const CONTROL_TICK: Duration = Duration::from_secs(1);

/// Runtime settings consulted by the build and update paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct IndexSettings {
    /// Apply directory-change notifications to the index.
    pub auto_update_index: bool,
    /// Skip `.DS_Store`, `._*` and friends while walking.
    pub ignore_system_files: bool,
    /// Path prefixes that are never indexed.
    pub ignore_paths: Vec<String>,
    pub max_index_depth: usize,
    /// Backend selected by `searcher::new_searcher`.
    pub search_mode: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            auto_update_index: false,
            ignore_system_files: false,
            ignore_paths: Vec::new(),
            max_index_depth: DEFAULT_MAX_INDEX_DEPTH,
            search_mode: DEFAULT_SEARCH_MODE.to_string(),
        }
    }
}

impl IndexSettings {
    /// Loads settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(error.into()),
        }
    }

    /// Writes the settings as JSON, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
    }

    pub fn is_ignored_path(&self, path: &str) -> bool {
        path_is_ignored(&self.ignore_paths, path)
    }
}

/// Tunables of one build. Defaults match the production constants; tests
/// shrink the tick.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub tick: Duration,
    pub high_water_mark: usize,
    pub stale_ticks: u32,
    pub dispatch_capacity: usize,
    pub workers: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        let cores = available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            tick: CONTROL_TICK,
            high_water_mark: HIGH_WATER_MARK,
            stale_ticks: STALE_TICKS,
            dispatch_capacity: DISPATCH_CAPACITY,
            workers: cores * WORKERS_PER_CORE,
        }
    }
}

impl BuildOptions {
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// Writes to a sibling temp file, then renames over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes).map_err(|error| {
        IndexError::Internal(format!(
            "failed to write {}: {error}",
            tmp_path.display()
        ))
    })?;
    fs::rename(&tmp_path, path).map_err(|error| {
        IndexError::Internal(format!("failed to finalize {}: {error}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_defaults() {
        let temp = TempDir::new().expect("tempdir");
        let settings = IndexSettings::load(&temp.path().join("absent.json")).expect("load");
        assert_eq!(settings, IndexSettings::default());
        assert_eq!(settings.max_index_depth, DEFAULT_MAX_INDEX_DEPTH);
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("conf/index.json");
        let settings = IndexSettings {
            auto_update_index: true,
            ignore_paths: vec!["/tmp".into()],
            ..IndexSettings::default()
        };
        settings.save(&path).expect("save");
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(IndexSettings::load(&path).expect("load"), settings);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("index.json");
        fs::write(&path, br#"{"ignore_system_files": true}"#).expect("write");
        let settings = IndexSettings::load(&path).expect("load");
        assert!(settings.ignore_system_files);
        assert_eq!(settings.search_mode, DEFAULT_SEARCH_MODE);
    }

    #[test]
    fn default_options_use_production_constants() {
        let options = BuildOptions::default();
        assert_eq!(options.high_water_mark, 10_000);
        assert_eq!(options.stale_ticks, 3);
        assert_eq!(options.dispatch_capacity, 1024);
        assert_eq!(options.workers % WORKERS_PER_CORE, 0);
    }
}
