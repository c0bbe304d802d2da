//! Scheduler configuration
//!
//! Loaded from (in order of priority):
//! 1. An explicit JSON file
//! 2. `mailsync.json` in the shared config directory (~/.config/mailsync/)
//! 3. Environment variables (fallback)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config filename in the shared config directory
const CONFIG_FILE: &str = "mailsync.json";

const ENV_MAX_CONCURRENT_TASKS: &str = "MAILSYNC_MAX_CONCURRENT_TASKS";
const ENV_MIN_EXEC_PERIOD: &str = "MAILSYNC_MIN_EXEC_PERIOD_MIN";
const ENV_DATABASE: &str = "MAILSYNC_DATABASE";

/// Limits of one scheduling pass and where origin state lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound of origins in process across all workers
    pub max_concurrent_tasks: usize,
    /// Minimum minutes between two state changes of an origin
    pub min_exec_period_minutes: i64,
    /// SQLite database holding origins and email entities
    pub database_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            min_exec_period_minutes: 30,
            database_path: None,
        }
    }
}

impl SchedulerConfig {
    /// Load the configuration using the following priority:
    /// 1. JSON file (~/.config/mailsync/mailsync.json)
    /// 2. Environment variables
    pub fn load() -> Result<Self> {
        if let Some(config) = config::load_json_opt(CONFIG_FILE)? {
            return Ok(config);
        }

        Self::from_env()
    }

    /// Load from `path` if given, otherwise as [`load`](Self::load) does
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::load(),
        }
    }

    /// Load the configuration from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse the configuration from a JSON string; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse scheduler config JSON")
    }

    /// Load the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MAX_CONCURRENT_TASKS) {
            config.max_concurrent_tasks = value
                .trim()
                .parse()
                .with_context(|| format!("{} is not a number: {}", ENV_MAX_CONCURRENT_TASKS, value))?;
        }
        if let Some(value) = lookup(ENV_MIN_EXEC_PERIOD) {
            config.min_exec_period_minutes = value
                .trim()
                .parse()
                .with_context(|| format!("{} is not a number: {}", ENV_MIN_EXEC_PERIOD, value))?;
        }
        if let Some(value) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            config.database_path = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    /// Save the configuration to the shared config directory
    pub fn save(&self) -> Result<PathBuf> {
        config::save_json(CONFIG_FILE, self)
    }

    /// Get the default config file path (~/.config/mailsync/mailsync.json)
    pub fn default_config_path() -> Option<PathBuf> {
        config::config_path(CONFIG_FILE)
    }
}
