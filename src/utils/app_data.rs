//! Application data directory and configuration.
//!
//! The snapshot lives in a well-known per-user data directory. Config is
//! loaded with the priority: environment variables > `config.toml` in the
//! app data directory > built-in defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_NAME: &str = "findex";
const SNAPSHOT_FILE: &str = "index.bin";
const CONFIG_FILE: &str = "config.toml";

/// Per-user data directory, created on first use.
pub fn app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        dirs::data_dir()
    };

    let base = base.context("could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);
    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

/// Location of the snapshot file.
pub fn snapshot_path() -> Result<PathBuf> {
    Ok(app_data_dir()?.join(SNAPSHOT_FILE))
}

/// On-disk configuration (every field optional; defaults fill the gaps).
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    roots: Option<Vec<PathBuf>>,
    excluded_paths: Option<Vec<String>>,
    skip_hidden: Option<bool>,
    crawl_batch_size: Option<usize>,
    watch_debounce_ms: Option<u64>,
    rebuild_debounce_secs: Option<u64>,
}

/// Effective application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root directories to index and watch.
    pub roots: Vec<PathBuf>,
    /// Path prefixes excluded from crawling.
    pub excluded_paths: Vec<String>,
    /// Skip entries whose name starts with `.`.
    pub skip_hidden: bool,
    /// Bulk-insert batch size, also the cancellation check cadence.
    pub crawl_batch_size: usize,
    /// Coalescing window for raw filesystem events.
    pub watch_debounce_ms: u64,
    /// Mutation quiescence window before a snapshot rebuild.
    pub rebuild_debounce_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            excluded_paths: Vec::new(),
            skip_hidden: true,
            crawl_batch_size: 1000,
            watch_debounce_ms: 500,
            rebuild_debounce_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn rebuild_debounce(&self) -> Duration {
        Duration::from_secs(self.rebuild_debounce_secs)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.roots {
            self.roots = v;
        }
        if let Some(v) = file.excluded_paths {
            self.excluded_paths = v;
        }
        if let Some(v) = file.skip_hidden {
            self.skip_hidden = v;
        }
        if let Some(v) = file.crawl_batch_size {
            self.crawl_batch_size = v;
        }
        if let Some(v) = file.watch_debounce_ms {
            self.watch_debounce_ms = v;
        }
        if let Some(v) = file.rebuild_debounce_secs {
            self.rebuild_debounce_secs = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("FINDEX_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                self.crawl_batch_size = n;
            }
        }
        if let Ok(val) = std::env::var("FINDEX_WATCH_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse() {
                self.watch_debounce_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("FINDEX_REBUILD_DEBOUNCE_SECS") {
            if let Ok(secs) = val.parse() {
                self.rebuild_debounce_secs = secs;
            }
        }
    }

    /// Load with priority: env vars > config file > defaults.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(file) = read_config_file() {
            config.apply_file(file);
        }
        config.apply_env();

        config
    }
}

fn read_config_file() -> Option<ConfigFile> {
    let path = app_data_dir().ok()?.join(CONFIG_FILE);
    if !path.exists() {
        return None;
    }
    let content = fs::read_to_string(&path).ok()?;
    toml::from_str(&content).ok()
}
