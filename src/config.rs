//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `PLCDAQ_*` environment variable overrides.

use crate::acquisition::connection::RetryPolicy;
use crate::acquisition::engine::{
    EngineConfig, DEFAULT_CHECKPOINT_CYCLES, DEFAULT_ROLLOVER_CHECK_CYCLES, DEFAULT_STATS_CYCLES,
};
use crate::acquisition::session::SessionConfig;
use crate::codec::PrecisionPolicy;
use crate::layout::{DuplicatePolicy, TypeSizes, DEFAULT_STRING_SIZE};
use crate::recording::RecordingMode;
use crate::storage::PartitionConfig;
use crate::transport::Endpoint;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub plc: PlcConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub precision: PrecisionPolicy,

    #[serde(default)]
    pub layout: LayoutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// PLC endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PlcConfig {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default)]
    pub rack: u16,

    #[serde(default = "default_slot")]
    pub slot: u16,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Run against the in-memory PLC instead of the network
    #[serde(default)]
    pub simulate: bool,
}

fn default_address() -> String {
    "192.168.0.1".to_string()
}

fn default_slot() -> u16 {
    1
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            rack: 0,
            slot: default_slot(),
            timeout_ms: default_timeout_ms(),
            simulate: false,
        }
    }
}

/// Acquisition loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AcquisitionConfig {
    /// Sleep between cycles
    #[serde(default = "default_cadence")]
    pub cadence_secs: f64,

    #[serde(default = "default_array_min_interval")]
    pub array_min_interval_secs: f64,

    #[serde(default = "default_stale_after")]
    pub stale_after_secs: f64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: f64,

    #[serde(default = "default_rollover_check_cycles")]
    pub rollover_check_cycles: u64,

    #[serde(default = "default_checkpoint_cycles")]
    pub checkpoint_cycles: u64,

    #[serde(default = "default_stats_cycles")]
    pub stats_cycles: u64,

    /// Array variable -> BOOL trigger variable
    #[serde(default)]
    pub array_triggers: HashMap<String, String>,
}

fn default_cadence() -> f64 {
    0.05
}

fn default_array_min_interval() -> f64 {
    1.0
}

fn default_stale_after() -> f64 {
    5.0
}

fn default_reconnect_delay() -> f64 {
    5.0
}

fn default_rollover_check_cycles() -> u64 {
    DEFAULT_ROLLOVER_CHECK_CYCLES
}

fn default_checkpoint_cycles() -> u64 {
    DEFAULT_CHECKPOINT_CYCLES
}

fn default_stats_cycles() -> u64 {
    DEFAULT_STATS_CYCLES
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence(),
            array_min_interval_secs: default_array_min_interval(),
            stale_after_secs: default_stale_after(),
            reconnect_delay_secs: default_reconnect_delay(),
            rollover_check_cycles: default_rollover_check_cycles(),
            checkpoint_cycles: default_checkpoint_cycles(),
            stats_cycles: default_stats_cycles(),
            array_triggers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingKind {
    #[default]
    Time,
    Variable,
}

/// Recording policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    #[serde(default)]
    pub mode: RecordingKind,

    /// Time mode interval
    #[serde(default = "default_interval")]
    pub interval_secs: f64,

    /// Variable mode trigger
    pub trigger: Option<String>,

    #[serde(default = "default_index_variable")]
    pub index_variable: Option<String>,

    /// Unset keeps the mode's default (on in time mode, off in variable mode)
    pub flush_arrays_on_index_change: Option<bool>,
}

fn default_interval() -> f64 {
    0.5
}

fn default_index_variable() -> Option<String> {
    Some("Dose_number".to_string())
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            mode: RecordingKind::default(),
            interval_secs: default_interval(),
            trigger: None,
            index_variable: default_index_variable(),
            flush_arrays_on_index_change: None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Label stored with every row; also the file base name unless overridden
    #[serde(default = "default_source_label")]
    pub source_label: String,

    /// File base name override
    pub base_name: Option<String>,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("plcdaq").to_string_lossy().to_string())
        .unwrap_or_else(|| "./plcdaq_data".to_string())
}

fn default_source_label() -> String {
    "PLC".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            source_label: default_source_label(),
            base_name: None,
        }
    }
}

/// Layout artifact configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_artifact")]
    pub artifact: String,

    #[serde(default = "default_string_size")]
    pub string_size: usize,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

fn default_artifact() -> String {
    "layout.json".to_string()
}

fn default_string_size() -> usize {
    DEFAULT_STRING_SIZE
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            artifact: default_artifact(),
            string_size: default_string_size(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("plcdaq").join("config.toml")),
            Some(PathBuf::from("/etc/plcdaq/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // PLC overrides
        if let Some(address) = var("PLCDAQ_PLC_ADDRESS") {
            self.plc.address = address;
        }
        if let Some(rack) = var("PLCDAQ_PLC_RACK").and_then(|v| v.parse().ok()) {
            self.plc.rack = rack;
        }
        if let Some(slot) = var("PLCDAQ_PLC_SLOT").and_then(|v| v.parse().ok()) {
            self.plc.slot = slot;
        }
        if let Some(simulate) = var("PLCDAQ_SIMULATE").and_then(|v| v.parse().ok()) {
            self.plc.simulate = simulate;
        }

        // Acquisition overrides
        if let Some(cadence) = var("PLCDAQ_CADENCE").and_then(|v| v.parse().ok()) {
            self.acquisition.cadence_secs = cadence;
        }

        // Storage overrides
        if let Some(data_dir) = var("PLCDAQ_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Some(base) = var("PLCDAQ_STORAGE_BASE") {
            self.storage.base_name = Some(base);
        }

        // Layout overrides
        if let Some(artifact) = var("PLCDAQ_LAYOUT") {
            self.layout.artifact = artifact;
        }

        // Logging overrides
        if let Some(level) = var("PLCDAQ_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("PLCDAQ_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.acquisition.cadence_secs >= 0.01) {
            return Err(invalid("acquisition.cadence_secs must be at least 0.01"));
        }
        if !(self.recording.interval_secs >= 0.1) {
            return Err(invalid("recording.interval_secs must be at least 0.1"));
        }
        for (key, value) in [
            ("acquisition.array_min_interval_secs", self.acquisition.array_min_interval_secs),
            ("acquisition.stale_after_secs", self.acquisition.stale_after_secs),
            ("acquisition.reconnect_delay_secs", self.acquisition.reconnect_delay_secs),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(invalid(&format!("{} must be a non-negative number", key)));
            }
        }
        if self.recording.mode == RecordingKind::Variable
            && self.recording.trigger.as_deref().map_or(true, str::is_empty)
        {
            return Err(invalid("recording.trigger is required in variable mode"));
        }
        if self.layout.string_size < 3 || self.layout.string_size > DEFAULT_STRING_SIZE {
            return Err(invalid("layout.string_size must be between 3 and 256"));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(invalid("logging.format must be \"pretty\" or \"json\""));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.plc.address.clone()).with_rack_slot(self.plc.rack, self.plc.slot)
    }

    pub fn type_sizes(&self) -> TypeSizes {
        TypeSizes::with_string_size(self.layout.string_size)
    }

    pub fn recording_mode(&self) -> Result<RecordingMode, ConfigError> {
        match self.recording.mode {
            RecordingKind::Time => Ok(RecordingMode::time(secs(
                "recording.interval_secs",
                self.recording.interval_secs,
            )?)),
            RecordingKind::Variable => self
                .recording
                .trigger
                .clone()
                .filter(|t| !t.is_empty())
                .map(RecordingMode::variable)
                .ok_or_else(|| invalid("recording.trigger is required in variable mode")),
        }
    }

    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig::new(
            PathBuf::from(&self.storage.data_dir),
            self.storage.source_label.clone(),
        )
        .with_base_override(self.storage.base_name.clone())
    }

    /// Validated engine configuration
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        self.validate()?;
        let acq = &self.acquisition;

        let mut config = EngineConfig::new(self.endpoint(), self.partition_config());
        config.cadence = secs("acquisition.cadence_secs", acq.cadence_secs)?;
        config.recording = self.recording_mode()?;
        config.index_variable = self.recording.index_variable.clone();
        config.flush_arrays_on_index_change = self.recording.flush_arrays_on_index_change;
        config.session = SessionConfig {
            array_triggers: acq.array_triggers.clone(),
            array_min_interval: secs(
                "acquisition.array_min_interval_secs",
                acq.array_min_interval_secs,
            )?,
            precision: self.precision.clone(),
            sizes: self.type_sizes(),
        };
        config.retry = RetryPolicy {
            stale_after: secs("acquisition.stale_after_secs", acq.stale_after_secs)?,
            reconnect_delay: secs("acquisition.reconnect_delay_secs", acq.reconnect_delay_secs)?,
        };
        config.rollover_check_cycles = acq.rollover_check_cycles;
        config.checkpoint_cycles = acq.checkpoint_cycles;
        config.stats_cycles = acq.stats_cycles;
        Ok(config)
    }

    pub fn plc_timeout(&self) -> Duration {
        Duration::from_millis(self.plc.timeout_ms)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

fn secs(key: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| invalid(&format!("{} is not a valid duration: {}", key, value)))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# plcdaq Configuration
#
# Environment variables override these settings:
# - PLCDAQ_PLC_ADDRESS
# - PLCDAQ_PLC_RACK
# - PLCDAQ_PLC_SLOT
# - PLCDAQ_SIMULATE
# - PLCDAQ_CADENCE
# - PLCDAQ_DATA_DIR
# - PLCDAQ_STORAGE_BASE
# - PLCDAQ_LAYOUT
# - PLCDAQ_LOG_LEVEL
# - PLCDAQ_LOG_FORMAT

[plc]
# PLC address, "host" or "host:port" (port 102 by default)
address = "192.168.0.1"
rack = 0
slot = 1

# Socket timeout per request (ms)
timeout_ms = 2000

# Use the in-memory simulated PLC
simulate = false

[acquisition]
# Sleep between cycles (seconds, minimum 0.01)
cadence_secs = 0.05

# Minimum time between two reads of the same array (seconds)
array_min_interval_secs = 1.0

# A failure is stale when the last good exchange is older than this (seconds)
stale_after_secs = 5.0

# Wait before reconnecting a stale connection (seconds)
reconnect_delay_secs = 5.0

# Day rollover check period (cycles)
rollover_check_cycles = 20

# WAL checkpoint period (cycles)
checkpoint_cycles = 1200

# Stats event period (cycles)
stats_cycles = 100

# Array variable -> BOOL trigger; arrays not listed are read every interval
[acquisition.array_triggers]
# Weight_curve = "Curve_trigger"

[recording]
# "time" or "variable"
mode = "time"

# Time mode: record every interval_secs (minimum 0.1)
interval_secs = 0.5

# Variable mode: record whenever this variable changes
# trigger = "Recipe_step"

# Arrays are captured when this variable changes
index_variable = "Dose_number"

# Override the mode default (on in time mode, off in variable mode)
# flush_arrays_on_index_change = true

[storage]
# Directory for the daily database files
data_dir = "~/.local/share/plcdaq"

# Written to every row; also the file name prefix
source_label = "PLC"

# File name prefix override
# base_name = "FlexPTS"

[precision]
# Decimal places for decoded REAL values
scalar_decimals = 3
array_decimals = 3

[[precision.rules]]
contains = "Density"
decimals = 4

[layout]
# Layout artifact written by `plcdaq allocate`
artifact = "layout.json"

# STRING size in bytes (254 characters + 2 header bytes)
string_size = 256

# Duplicate names across groups: "overwrite" or "reject"
duplicate_policy = "overwrite"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty, json
format = "pretty"

# Optional log file
# file = "/var/log/plcdaq.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.plc.slot, 1);
        assert_eq!(config.acquisition.cadence_secs, 0.05);
        assert_eq!(config.recording.mode, RecordingKind::Time);
        assert_eq!(config.layout.duplicate_policy, DuplicatePolicy::Overwrite);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_default_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.precision, PrecisionPolicy::default());
        assert_eq!(config.recording.index_variable.as_deref(), Some("Dose_number"));
        assert!(config.acquisition.array_triggers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[plc]
address = "10.0.0.5"
slot = 2

[recording]
mode = "variable"
trigger = "Recipe_step"

[acquisition.array_triggers]
Weight_curve = "Curve_trigger"

[layout]
duplicate_policy = "reject"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.endpoint(), Endpoint::new("10.0.0.5").with_rack_slot(0, 2));
        assert_eq!(config.layout.duplicate_policy, DuplicatePolicy::Reject);

        let engine = config.engine_config().unwrap();
        assert_eq!(engine.recording, RecordingMode::variable("Recipe_step"));
        assert_eq!(
            engine.session.array_triggers.get("Weight_curve").map(String::as_str),
            Some("Curve_trigger")
        );
        assert_eq!(engine.cadence, Duration::from_millis(50));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/plcdaq.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.acquisition.cadence_secs = 0.005;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.recording.interval_secs = 0.05;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.recording.mode = RecordingKind::Variable;
        assert!(config.validate().is_err());
        config.recording.trigger = Some("Recipe_step".into());
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PLCDAQ_PLC_ADDRESS", "plc.local:1102"),
            ("PLCDAQ_PLC_SLOT", "3"),
            ("PLCDAQ_DATA_DIR", "/data/plcdaq"),
            ("PLCDAQ_STORAGE_BASE", "FlexPTS"),
            ("PLCDAQ_CADENCE", "0.2"),
            ("PLCDAQ_PLC_RACK", "not a number"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.plc.address, "plc.local:1102");
        assert_eq!(config.plc.slot, 3);
        assert_eq!(config.plc.rack, 0);
        assert_eq!(config.acquisition.cadence_secs, 0.2);
        assert_eq!(
            config.partition_config().path_for(chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            PathBuf::from("/data/plcdaq/FlexPTS_2024-03-01.db")
        );
    }
}
