//! Human-facing text logging, grounded on `ddshow`'s use of `tracing` for
//! its own diagnostic output (`tracing::info!`/`debug!`/`trace!` scattered
//! through its dataflow construction code).
//!
//! AMI's binaries (`ami-manager`, `ami-worker`, `ami-local-collector`,
//! `ami-global-collector`, `ami-local`) all thread a `--log-level` flag and
//! an `AMI_LOG` environment variable (spec.md §6) down to [`init`].

use std::path::PathBuf;

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// The five severities spec.md's CLI surface names for `--log-level`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Guard returned by [`init`]; keep it alive for the lifetime of the
/// process when logging to a file, or the appender's background writer
/// thread is torn down and log lines are silently dropped.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initializes the global `tracing` subscriber.
///
/// `level` sets the default filter; `AMI_LOG` (read via `EnvFilter`'s
/// `RUST_LOG`-style syntax) overrides it per-module when set. `log_file`,
/// if given, additionally mirrors output to that path instead of stderr.
pub fn init(level: LogLevel, log_file: Option<PathBuf>) -> LoggingGuard {
    let filter = match std::env::var("AMI_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(level.as_filter_str()),
    };

    match log_file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|n| n.to_owned()).unwrap_or_else(|| "ami.log".into());
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).with_ansi(false).init();
            LoggingGuard { _file_guard: Some(guard) }
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            LoggingGuard { _file_guard: None }
        }
    }
}
