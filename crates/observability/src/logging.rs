//! Log filter and subscriber setup.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use eyre::{Result, WrapErr};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// What to log and where.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Errors only, overriding everything else.
    pub quiet: bool,
    /// 0 = info, 1 = debug, 2+ = trace.
    pub verbosity: u8,
    /// Extra comma-separated filter directives.
    pub filter: Option<String>,
    /// Receives every event that passes the filter.
    pub debug_file: Option<PathBuf>,
    /// Receives error events only.
    pub error_file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds the event filter.
    ///
    /// Precedence:
    /// 1. `quiet` shows errors only
    /// 2. otherwise `RUST_LOG` if set, else the verbosity level
    /// 3. `filter` directives are added on top; malformed ones are skipped
    pub fn env_filter(&self) -> EnvFilter {
        if self.quiet {
            return EnvFilter::new("error");
        }

        let level = match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        if let Some(directives) = &self.filter {
            for directive in directives.split(',').map(str::trim) {
                if let Ok(directive) = directive.parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }
        filter
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let stdout = fmt::layer().with_ansi(true).with_target(true);

    let debug = match &config.debug_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(open_append(path)?)),
        ),
        None => None,
    };

    let error = match &config.error_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(open_append(path)?))
                .with_filter(LevelFilter::ERROR),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(stdout)
        .with(debug)
        .with(error)
        .try_init()
        .wrap_err("failed to install tracing subscriber")?;

    Ok(())
}

/// Opens `path` for appending, creating it and its parent directories.
fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create log directory {}", parent.display()))?;
    }

    File::options()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("failed to open log file {}", path.display()))
}
