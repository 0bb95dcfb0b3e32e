//! Structured JSON trace logging to a file.

use crate::config::ListenerConfig;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Where trace lines are written; `VOXLISTEN_TRACE_LOG` overrides the temp file.
pub fn trace_log_path() -> PathBuf {
    env::var("VOXLISTEN_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("voxlisten_trace.jsonl"))
}

pub fn logging_enabled(config: &ListenerConfig) -> bool {
    (config.logs || config.log_timings) && !config.no_logs
}

/// Install the global JSON subscriber when logging is enabled. Safe to call twice.
pub fn init_logging(config: &ListenerConfig) {
    if !logging_enabled(config) {
        return;
    }
    let level = if config.log_timings { "trace" } else { "debug" };

    let _ = TRACING_INIT.get_or_init(|| {
        let path = trace_log_path();
        truncate_if_oversized(&path, LOG_MAX_BYTES);
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(_) => return,
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::new(format!("voxlisten={level}")))
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn truncate_if_oversized(path: &Path, max_bytes: u64) {
    let size = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
    if size > max_bytes {
        let _ = OpenOptions::new().write(true).truncate(true).open(path);
    }
}
