//! Per-vault file logging.
//!
//! Installs a global tracing subscriber writing to `logs/vault.log` inside
//! the vault. Only one global subscriber can exist per process, so a
//! second vault (or a host application with its own subscriber) simply
//! runs without a vault log.

use std::path::Path;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reevault_common::{Error, Result};

/// Environment variable overriding the vault log filter.
pub const LOG_ENV: &str = "REEVAULT_LOG";

const LOG_FILE_PREFIX: &str = "vault";
const LOG_FILE_SUFFIX: &str = "log";

/// Handle keeping the background log writer alive.
#[must_use = "Dropping this handle stops the vault log writer."]
#[derive(Debug)]
pub struct VaultLogger {
    _guard: WorkerGuard,
}

impl VaultLogger {
    /// Install the file subscriber under `logs_dir`.
    ///
    /// # Errors
    /// Returns [`Error::Logger`] if the log file cannot be opened or a
    /// global subscriber is already set.
    pub fn init(logs_dir: &Path) -> Result<Self> {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix(LOG_FILE_SUFFIX)
            .build(logs_dir)
            .map_err(|e| Error::Logger(e.to_string()))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);

        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .try_init()
            .map_err(|e| Error::Logger(e.to_string()))?;

        Ok(Self { _guard: guard })
    }

    /// Like [`VaultLogger::init`], but failure only emits a warning.
    pub fn try_init(logs_dir: &Path) -> Option<Self> {
        match Self::init(logs_dir) {
            Ok(logger) => Some(logger),
            Err(e) => {
                warn!(error = %e, "Vault log unavailable, continuing without it");
                None
            }
        }
    }
}
