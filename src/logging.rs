use std::fs;
use std::time::Instant;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{AppConfig, DEFAULT_LOG_FILTER};
use crate::AppError;

pub const LOG_FILE_PREFIX: &str = "stockroom.log";

/// Install the global subscriber: JSON lines on stderr, plus a daily rolling
/// file when `log_dir` is configured. Keep the returned guard alive for the
/// lifetime of the process so buffered file output is flushed.
///
/// Installing twice is harmless; the second call leaves the first subscriber
/// in place.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}

/// Times one user intent and logs its start and outcome.
pub struct LogScope {
    cmd: &'static str,
    start: Instant,
}

impl LogScope {
    pub fn new(cmd: &'static str) -> Self {
        debug!(target: "stockroom", cmd, stage = "enter");
        Self {
            cmd,
            start: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    pub fn success(self) {
        info!(
            target: "stockroom",
            cmd = self.cmd,
            stage = "ok",
            duration_ms = self.elapsed_ms() as u64
        );
    }

    pub fn fail(self, error: &AppError) {
        warn!(
            target: "stockroom",
            cmd = self.cmd,
            stage = "failed",
            code = error.code(),
            message = error.message(),
            duration_ms = self.elapsed_ms() as u64
        );
    }
}
