use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::export::DEFAULT_EXPORT_FILE;
use crate::model::DEFAULT_LOW_THRESHOLD;
use crate::{AppError, AppResult};

pub const LOG_FILTER_ENV: &str = "STOCKROOM_LOG";
pub const DATA_DIR_ENV: &str = "STOCKROOM_DATA_DIR";
pub const DEFAULT_LOG_FILTER: &str = "stockroom=info";
pub const APP_IDENTIFIER: &str = "stockroom";

const CONFIG_READ_FAILED: &str = "CONFIG/READ_FAILED";
const CONFIG_INVALID: &str = "CONFIG/INVALID";

fn default_collection() -> String {
    "inventory".to_string()
}

fn default_low_threshold() -> u64 {
    DEFAULT_LOW_THRESHOLD
}

fn default_export_file_name() -> String {
    DEFAULT_EXPORT_FILE.to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_data_dir() -> PathBuf {
    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(APP_IDENTIFIER)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_low_threshold")]
    pub default_low_threshold: u64,
    #[serde(default = "default_export_file_name")]
    pub export_file_name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            default_low_threshold: default_low_threshold(),
            export_file_name: default_export_file_name(),
            data_dir: default_data_dir(),
            log_dir: None,
            log_filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Read the config file if given (a missing file means defaults), then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> AppResult<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(CONFIG_READ_FAILED, "Could not read the configuration file")
                .with_context("path", path.display().to_string())
                .with_cause(err)
        })?;
        serde_json::from_str(&text).map_err(|err| {
            AppError::new(CONFIG_INVALID, "The configuration file is not valid")
                .with_context("path", path.display().to_string())
                .with_cause(err)
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(filter) = lookup(LOG_FILTER_ENV).filter(|v| !v.trim().is_empty()) {
            self.log_filter = filter;
        }
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }
}
