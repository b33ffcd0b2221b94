//! Logging bootstrap for processes embedding the persistence layer.
//!
//! # Responsibility
//! - Turn the `Logging.*` settings into a validated `LogConfig`.
//! - Start file-based rolling logs exactly once per process.
//!
//! # Invariants
//! - Initialization is idempotent for an identical `LogConfig`.
//! - Re-initialization with a different configuration is rejected.
//! - Initialization never panics.
//! - Log lines carry metadata only (`event=... module=... status=...`),
//!   never entity bodies.
//!
//! # Settings
//! - `Logging.Directory`: absolute path; logging stays off without it.
//! - `Logging.Level`: `trace|debug|info|warn|error`, defaults to
//!   `default_log_level()`.
//! - `Logging.Module.<path>`: level override for `polystore_core::<path>`,
//!   e.g. `Logging.Module.backend.sql = trace`.
//! - `Logging.MaxFileBytes`, `Logging.MaxFiles`: rotation limits.

use crate::config::Settings;
use crate::error::{RepoError, RepoResult};
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "polystore";
const CRATE_TARGET: &str = "polystore_core";
const DIRECTORY_KEY: &str = "Logging.Directory";
const LEVEL_KEY: &str = "Logging.Level";
const MODULE_PREFIX: &str = "Logging.Module";
const MAX_FILE_BYTES_KEY: &str = "Logging.MaxFileBytes";
const MAX_FILES_KEY: &str = "Logging.MaxFiles";
const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 5;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    config: LogConfig,
    _logger: LoggerHandle,
}

/// Validated logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    level: &'static str,
    directory: PathBuf,
    /// `(module path below the crate, level)`, sorted by path.
    modules: Vec<(String, &'static str)>,
    max_file_bytes: u64,
    max_files: usize,
}

impl LogConfig {
    /// Configuration with default rotation and no module overrides.
    ///
    /// # Errors
    /// - `Configuration` for an unknown level or a relative/empty directory.
    pub fn new(level: &str, directory: &str) -> RepoResult<Self> {
        Ok(Self {
            level: normalize_level(LEVEL_KEY, level)?,
            directory: normalize_log_dir(directory)?,
            modules: Vec::new(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
        })
    }

    /// Reads the `Logging.*` section. `Ok(None)` when no directory is set.
    ///
    /// # Errors
    /// - `Configuration` for invalid levels, paths or rotation limits.
    pub fn from_settings(settings: &Settings) -> RepoResult<Option<Self>> {
        let Some(directory) = settings.get_non_empty(DIRECTORY_KEY) else {
            return Ok(None);
        };
        let level = settings
            .get_non_empty(LEVEL_KEY)
            .unwrap_or(default_log_level());
        let mut config = Self::new(level, directory)?;

        for (path, value) in settings.keys_with_prefix(MODULE_PREFIX) {
            let key = format!("{MODULE_PREFIX}.{path}");
            if path.split('.').any(str::is_empty) {
                return Err(RepoError::Configuration(format!(
                    "setting `{key}` does not name a module"
                )));
            }
            config
                .modules
                .push((path.replace('.', "::"), normalize_level(&key, value)?));
        }
        config.modules.sort();

        if let Some(bytes) = settings.get_parsed::<u64>(MAX_FILE_BYTES_KEY)? {
            config.max_file_bytes = positive(MAX_FILE_BYTES_KEY, bytes)?;
        }
        if let Some(files) = settings.get_parsed::<usize>(MAX_FILES_KEY)? {
            config.max_files = positive(MAX_FILES_KEY, files)?;
        }
        Ok(Some(config))
    }

    pub fn level(&self) -> &'static str {
        self.level
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `flexi_logger` spec string: the base level, then one directive per
    /// module override.
    pub fn spec(&self) -> String {
        let mut spec = self.level.to_string();
        for (path, level) in &self.modules {
            spec.push_str(&format!(", {CRATE_TARGET}::{path}={level}"));
        }
        spec
    }
}

fn positive<N: PartialEq + Default>(key: &str, value: N) -> RepoResult<N> {
    if value == N::default() {
        return Err(RepoError::Configuration(format!(
            "setting `{key}` must be greater than zero"
        )));
    }
    Ok(value)
}

/// Starts process logging.
///
/// # Errors
/// - `Configuration` when logging is already active with another
///   configuration, the directory cannot be created or the backend fails.
pub fn init_logging(config: &LogConfig) -> RepoResult<()> {
    let state = LOGGING_STATE.get_or_try_init(|| start_logger(config))?;
    if state.config != *config {
        return Err(RepoError::Configuration(format!(
            "logging already initialized as `{}` at `{}`; refusing to switch to `{}` at `{}`",
            state.config.spec(),
            state.config.directory.display(),
            config.spec(),
            config.directory.display()
        )));
    }
    Ok(())
}

/// Starts logging from the `Logging.*` settings.
///
/// Returns `Ok(false)` without touching the logger when no directory is
/// configured.
///
/// # Errors
/// - `Configuration` from `LogConfig::from_settings` or `init_logging`.
pub fn init_from_settings(settings: &Settings) -> RepoResult<bool> {
    match LogConfig::from_settings(settings)? {
        Some(config) => init_logging(&config).map(|()| true),
        None => Ok(false),
    }
}

/// Default level for the current build mode: `debug` or `info`.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(config: &LogConfig) -> RepoResult<LoggingState> {
    std::fs::create_dir_all(&config.directory).map_err(|err| {
        RepoError::Configuration(format!(
            "failed to create log directory `{}`: {err}",
            config.directory.display()
        ))
    })?;

    let spec = config.spec();
    let logger = Logger::try_with_str(&spec)
        .map_err(|err| RepoError::Configuration(format!("invalid log spec `{spec}`: {err}")))?
        .log_to_file(
            FileSpec::default()
                .directory(config.directory.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(config.max_file_bytes),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config.max_files),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| RepoError::Configuration(format!("failed to start logger: {err}")))?;

    info!(
        "event=logging_init module=logging status=ok spec={spec} log_dir={} max_file_bytes={} max_files={} version={}",
        config.directory.display(),
        config.max_file_bytes,
        config.max_files,
        env!("CARGO_PKG_VERSION")
    );
    Ok(LoggingState {
        config: config.clone(),
        _logger: logger,
    })
}

fn normalize_level(key: &str, level: &str) -> RepoResult<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(RepoError::Configuration(format!(
            "setting `{key}` has unsupported log level `{other}`; expected trace|debug|info|warn|error"
        ))),
    }
}

fn normalize_log_dir(log_dir: &str) -> RepoResult<PathBuf> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err(RepoError::Configuration(format!(
            "setting `{DIRECTORY_KEY}` cannot be empty"
        )));
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(RepoError::Configuration(format!(
            "setting `{DIRECTORY_KEY}` must be an absolute path, got `{trimmed}`"
        )));
    }
    Ok(path.to_path_buf())
}
