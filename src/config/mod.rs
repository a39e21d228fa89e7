//! Configuration module for tempmon
//!
//! Application configuration is a TOML file stored in the platform-appropriate
//! data directory under `dev.tempmon.tempmon`:
//!
//! - **Linux**: `~/.local/share/dev.tempmon.tempmon/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.tempmon.tempmon/config.toml`
//! - **Windows**: `%APPDATA%\dev.tempmon.tempmon\config.toml`
//!
//! The acquisition core never reads this file. The binary loads it once and
//! hands explicit parameters ([`AcquisitionSettings`](crate::acquisition::AcquisitionSettings),
//! [`SinkConfig`](crate::acquisition::SinkConfig), [`AdapterOptions`](crate::external::AdapterOptions))
//! to the core at startup.
//!
//! # Example
//!
//! ```ignore
//! use tempmon::config::AppConfig;
//!
//! let config = AppConfig::load_or_default();
//! let settings = config.acquisition_settings();
//! ```

use crate::error::{Result, ResultExt, TempMonError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.tempmon.tempmon";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Folder created under the user's documents directory for measurements
pub const MEASUREMENTS_FOLDER: &str = "TemperatureMonitor";

/// Baud rate the sensor firmware talks at
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Time the remote board needs after the port opens (it resets on DTR)
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Idle sleep between polls of the serial link
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Number of samples kept for live visualization
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// CH340 matched by name (Windows) or by USB VID:PID (Linux, macOS)
pub const DEFAULT_CHIP_IDS: [&str; 2] = ["ch340", "1a86:7523"];

/// Prog IDs of the spreadsheet application's automation server, in probe order
pub const DEFAULT_PROG_IDS: [&str; 2] = ["Origin.ApplicationSI", "Origin.Application"];

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        TempMonError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create app data directory {}", dir.display()))?;
    }

    Ok(dir)
}

/// Default folder for measurement files: `<Documents>/TemperatureMonitor`,
/// falling back to the home directory and then the working directory.
pub fn default_output_folder() -> PathBuf {
    dirs_next::document_dir()
        .or_else(dirs_next::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(MEASUREMENTS_FOLDER)
}

/// Create the output folder if it does not exist yet
pub fn ensure_output_folder(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create output folder {}", path.display()))?;
        tracing::info!("Created output folder {}", path.display());
    }
    Ok(())
}

// ==================== Serial Config ====================

/// Serial link and sampling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate of the sensor link
    pub baud_rate: u32,

    /// Delay after opening the port before sampling starts (ms)
    pub settle_delay_ms: u64,

    /// Sleep between polls when no complete line is available (ms)
    pub poll_interval_ms: u64,

    /// Read timeout handed to the serial driver (ms)
    pub read_timeout_ms: u64,

    /// Case-insensitive substrings identifying the sensor's USB-serial chip
    pub known_chip_ids: Vec<String>,

    /// Longest line accepted before the buffered bytes are discarded
    pub max_line_bytes: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_timeout_ms: 500,
            known_chip_ids: DEFAULT_CHIP_IDS.iter().map(|s| s.to_string()).collect(),
            max_line_bytes: 256,
        }
    }
}

// ==================== External Sink Config ====================

/// Which automation host backs the external sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SurfaceBackend {
    /// The platform's automation bridge (reports unavailable where none exists)
    #[default]
    Platform,
    /// In-process memory surface, for dry runs without the real application
    Memory,
}

impl std::fmt::Display for SurfaceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceBackend::Platform => write!(f, "platform"),
            SurfaceBackend::Memory => write!(f, "memory"),
        }
    }
}

/// What happens to the row cursor when every write strategy fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RowPolicy {
    /// Keep the cursor; the next successful write reuses the row
    #[default]
    RetryRow,
    /// Advance past the failed row and report it as skipped
    SkipFailedRow,
}

/// External spreadsheet sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSinkConfig {
    /// Whether sessions write to the external application
    pub enabled: bool,

    /// Automation host implementation
    pub backend: SurfaceBackend,

    /// Automation prog IDs, most preferred first
    pub prog_ids: Vec<String>,

    /// Try the last successful write strategy first
    pub cache_winning_strategy: bool,

    /// Row cursor behaviour after a write where every strategy failed
    pub row_policy: RowPolicy,

    /// How long `start`/`stop` wait for the worker to answer (ms)
    pub reply_timeout_ms: u64,
}

impl Default for ExternalSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: SurfaceBackend::Platform,
            prog_ids: DEFAULT_PROG_IDS.iter().map(|s| s.to_string()).collect(),
            cache_winning_strategy: false,
            row_policy: RowPolicy::RetryRow,
            reply_timeout_ms: 30_000,
        }
    }
}

impl ExternalSinkConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

// ==================== Logging Config ====================

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,

    /// Also write a daily-rolling log file under the app data directory
    pub log_to_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,tempmon=debug".to_string(),
            log_to_file: false,
        }
    }
}

// ==================== App Config ====================

/// Persistent application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Folder receiving one CSV file per session (None = default location)
    pub output_folder: Option<PathBuf>,

    /// Samples kept in the live visualization window
    pub window_capacity: usize,

    /// Serial link configuration
    pub serial: SerialConfig,

    /// External spreadsheet sink configuration
    pub external_sink: ExternalSinkConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_folder: None,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            serial: SerialConfig::default(),
            external_sink: ExternalSinkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn config_path() -> Option<PathBuf> {
        app_data_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load a config file; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        toml::from_str(&content)
            .map_err(|e| TempMonError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load the config from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TempMonError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config {}", path.as_ref().display()))?;

        tracing::debug!("Saved config to {:?}", path.as_ref());
        Ok(())
    }

    /// Write the config to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub fn save_if_missing(&self, path: impl AsRef<Path>) -> Result<bool> {
        if path.as_ref().exists() {
            return Ok(false);
        }
        self.save(path)?;
        Ok(true)
    }

    /// Seed the default location on first run
    pub fn save_default(&self) -> Result<bool> {
        let dir = ensure_app_data_dir().context("Failed to prepare config directory")?;
        self.save_if_missing(dir.join(CONFIG_FILE))
    }

    /// Resolved output folder
    pub fn output_folder(&self) -> PathBuf {
        self.output_folder
            .clone()
            .unwrap_or_else(default_output_folder)
    }

    /// Parameters for the acquisition controller
    pub fn acquisition_settings(&self) -> crate::acquisition::AcquisitionSettings {
        crate::acquisition::AcquisitionSettings {
            baud_rate: self.serial.baud_rate,
            settle_delay: Duration::from_millis(self.serial.settle_delay_ms),
            poll_interval: Duration::from_millis(self.serial.poll_interval_ms),
        }
    }

    /// Sink parameters for one session
    pub fn sink_config(&self, use_external_sink: bool) -> crate::acquisition::SinkConfig {
        crate::acquisition::SinkConfig {
            output_folder: self.output_folder(),
            use_external_sink,
        }
    }

    /// Options for the external sink adapter
    pub fn adapter_options(&self) -> crate::external::AdapterOptions {
        crate::external::AdapterOptions {
            prog_ids: self.external_sink.prog_ids.clone(),
            cache_winning_strategy: self.external_sink.cache_winning_strategy,
            row_policy: self.external_sink.row_policy,
        }
    }
}

// ==================== Tests ====================
