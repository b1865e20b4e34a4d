use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::projector::{render_csv, CsvTable};
use crate::util::write_atomic;
use crate::{AppError, AppResult};

pub const DEFAULT_EXPORT_FILE: &str = "inventory.csv";

/// Destination for CSV exports.
pub trait CsvSink {
    /// Deliver the table; returns where it ended up.
    fn export(&self, table: &CsvTable) -> AppResult<PathBuf>;
}

/// Writes the export as a single file inside a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    file_name: String,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_name: DEFAULT_EXPORT_FILE.to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn target(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

impl CsvSink for DirectorySink {
    fn export(&self, table: &CsvTable) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "create_export_dir")
                .with_context("path", self.dir.display().to_string())
        })?;
        let target = self.target();
        write_atomic(&target, render_csv(table).as_bytes())?;
        info!(
            target: "stockroom",
            event = "csv_exported",
            path = %target.display(),
            rows = table.rows.len()
        );
        Ok(target)
    }
}
