use crate::app::coordinator::CoordinatorSettings;
use crate::buffer::{BufferSettings, StrategyKind};
use crate::domain::Priority;
use crate::reliability::RetryConfig;
use crate::sender::HttpTransportConfig;
use crate::validation::ValidatorConfig;
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Preset trade-offs between latency and resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Lowest resource usage, highest latency
    Minimal,
    Balanced,
    HighPerformance,
    /// Lowest latency, highest resource usage
    RealTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSettings {
    pub batch_interval_secs: u64,
    pub max_batch_size: usize,
    pub buffer_strategy: StrategyKind,
    pub retry_queue_size: usize,
}

impl Profile {
    pub fn settings(&self) -> ProfileSettings {
        let (batch_interval_secs, max_batch_size, buffer_strategy, retry_queue_size) = match self {
            Profile::Minimal => (600, 50, StrategyKind::Time, 100),
            Profile::Balanced => (300, 100, StrategyKind::Hybrid, 500),
            Profile::HighPerformance => (60, 200, StrategyKind::Priority, 1000),
            Profile::RealTime => (30, 500, StrategyKind::Priority, 2000),
        };
        ProfileSettings {
            batch_interval_secs,
            max_batch_size,
            buffer_strategy,
            retry_queue_size,
        }
    }
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Time-series ingestion endpoint URL
    #[arg(
        long,
        env = "SERIES_ENDPOINT",
        default_value = "http://localhost:8080/v1/series"
    )]
    pub endpoint: String,

    /// Bearer token sent with every request
    #[arg(long, env = "SERIES_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Gzip request bodies
    #[arg(long, env = "ENABLE_COMPRESSION")]
    pub enable_compression: bool,

    /// Flush interval in seconds for time-based strategies
    #[arg(long, env = "BATCH_INTERVAL_SECS", default_value = "300")]
    pub batch_interval_secs: u64,

    /// Buffered samples that trigger a size flush
    #[arg(long, env = "MAX_BATCH_SIZE", default_value = "100")]
    pub max_batch_size: usize,

    /// Buffer flush strategy
    #[arg(long, env = "BUFFER_STRATEGY", default_value = "hybrid")]
    pub buffer_strategy: StrategyKind,

    /// Shortest flush interval of the adaptive strategy, in seconds
    #[arg(long, env = "ADAPTIVE_MIN_INTERVAL_SECS", default_value = "60")]
    pub adaptive_min_interval_secs: u64,

    /// Longest flush interval of the adaptive strategy, in seconds
    #[arg(long, env = "ADAPTIVE_MAX_INTERVAL_SECS", default_value = "600")]
    pub adaptive_max_interval_secs: u64,

    /// Lowest priority that triggers an immediate flush under the priority strategy
    #[arg(long, env = "PRIORITY_THRESHOLD", default_value = "high")]
    pub priority_threshold: Priority,

    /// How often to check size, priority and adaptive triggers, in seconds
    #[arg(long, env = "FLUSH_CHECK_INTERVAL_SECS", default_value = "10")]
    pub flush_check_interval_secs: u64,

    /// Reject samples older than this many seconds (0 disables)
    #[arg(long, env = "STALE_THRESHOLD_SECS", default_value = "300")]
    pub stale_threshold_secs: u64,

    /// Check values against the per-category range table
    #[arg(long, env = "VALIDATE_RANGES", default_value_t = true, action = ArgAction::Set)]
    pub validate_ranges: bool,

    /// Only buffer samples whose value changed
    #[arg(long, env = "TRACK_CHANGES_ONLY")]
    pub track_changes_only: bool,

    /// Smallest change that counts in change-only mode
    #[arg(long, env = "CHANGE_THRESHOLD", default_value = "0.0")]
    pub change_threshold: f64,

    /// Retry sends before a batch is abandoned
    #[arg(long, env = "MAX_RETRY_ATTEMPTS", default_value = "5")]
    pub max_retry_attempts: u32,

    /// Base retry delay in seconds
    #[arg(long, env = "RETRY_BASE_DELAY_SECS", default_value = "2.0")]
    pub retry_base_delay_secs: f64,

    /// Retry delay cap in seconds
    #[arg(long, env = "RETRY_MAX_DELAY_SECS", default_value = "300.0")]
    pub retry_max_delay_secs: f64,

    /// Maximum batches waiting for retry
    #[arg(long, env = "RETRY_QUEUE_SIZE", default_value = "1000")]
    pub retry_queue_size: usize,

    /// Randomize retry delays
    #[arg(long, env = "RETRY_JITTER")]
    pub retry_jitter: bool,

    /// How often the retry queue is processed, in seconds
    #[arg(long, env = "RETRY_INTERVAL_SECS", default_value = "5")]
    pub retry_interval_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Serve /health, /metrics, /flush and /reset over HTTP
    #[arg(long, env = "ENABLE_DIAGNOSTICS")]
    pub enable_diagnostics: bool,

    /// Diagnostics server port
    #[arg(long, env = "DIAGNOSTICS_PORT", default_value = "9090")]
    pub diagnostics_port: u16,

    /// Stream catalog (TOML)
    #[arg(long, env = "STREAM_CATALOG")]
    pub catalog_file: Option<PathBuf>,

    /// NDJSON observation input, `-` for stdin
    #[arg(long, env = "OBSERVATION_INPUT", default_value = "-")]
    pub input: String,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Performance profile; overrides interval, batch size, strategy and retry queue size
    #[arg(long, env = "PERFORMANCE_PROFILE")]
    pub profile: Option<Profile>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub batch_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub flush_check_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub retry_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/series".to_string(),
            auth_token: None,
            request_timeout_secs: 30,
            enable_compression: false,
            batch_interval_secs: 300,
            max_batch_size: 100,
            buffer_strategy: StrategyKind::Hybrid,
            adaptive_min_interval_secs: 60,
            adaptive_max_interval_secs: 600,
            priority_threshold: Priority::High,
            flush_check_interval_secs: 10,
            stale_threshold_secs: 300,
            validate_ranges: true,
            track_changes_only: false,
            change_threshold: 0.0,
            max_retry_attempts: 5,
            retry_base_delay_secs: 2.0,
            retry_max_delay_secs: 300.0,
            retry_queue_size: 1000,
            retry_jitter: false,
            retry_interval_secs: 5,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            enable_diagnostics: false,
            diagnostics_port: 9090,
            catalog_file: None,
            input: "-".to_string(),
            config_file: None,
            profile: None,
            batch_interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            flush_check_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse CLI arguments (with env fallbacks). A `--config-file` replaces
    /// everything else.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::parse_from(args);
        match &config.config_file {
            Some(path) => {
                let mut from_file = Self::from_file(path)?;
                from_file.config_file = Some(path.clone());
                Ok(from_file)
            }
            None => {
                let mut config = config;
                config.post_process()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_string("SERIES_ENDPOINT", &mut config.endpoint);
        load_env_string_opt("SERIES_AUTH_TOKEN", &mut config.auth_token);
        load_env_var("REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs)?;
        load_env_var("ENABLE_COMPRESSION", &mut config.enable_compression)?;
        load_env_var("BATCH_INTERVAL_SECS", &mut config.batch_interval_secs)?;
        load_env_var("MAX_BATCH_SIZE", &mut config.max_batch_size)?;
        load_env_enum("BUFFER_STRATEGY", &mut config.buffer_strategy)?;
        load_env_var(
            "ADAPTIVE_MIN_INTERVAL_SECS",
            &mut config.adaptive_min_interval_secs,
        )?;
        load_env_var(
            "ADAPTIVE_MAX_INTERVAL_SECS",
            &mut config.adaptive_max_interval_secs,
        )?;
        load_env_enum("PRIORITY_THRESHOLD", &mut config.priority_threshold)?;
        load_env_var(
            "FLUSH_CHECK_INTERVAL_SECS",
            &mut config.flush_check_interval_secs,
        )?;
        load_env_var("STALE_THRESHOLD_SECS", &mut config.stale_threshold_secs)?;
        load_env_var("VALIDATE_RANGES", &mut config.validate_ranges)?;
        load_env_var("TRACK_CHANGES_ONLY", &mut config.track_changes_only)?;
        load_env_var("CHANGE_THRESHOLD", &mut config.change_threshold)?;
        load_env_var("MAX_RETRY_ATTEMPTS", &mut config.max_retry_attempts)?;
        load_env_var("RETRY_BASE_DELAY_SECS", &mut config.retry_base_delay_secs)?;
        load_env_var("RETRY_MAX_DELAY_SECS", &mut config.retry_max_delay_secs)?;
        load_env_var("RETRY_QUEUE_SIZE", &mut config.retry_queue_size)?;
        load_env_var("RETRY_JITTER", &mut config.retry_jitter)?;
        load_env_var("RETRY_INTERVAL_SECS", &mut config.retry_interval_secs)?;
        load_env_enum("LOG_LEVEL", &mut config.log_level)?;
        load_env_enum("LOG_FORMAT", &mut config.log_format)?;
        load_env_var("ENABLE_DIAGNOSTICS", &mut config.enable_diagnostics)?;
        load_env_var("DIAGNOSTICS_PORT", &mut config.diagnostics_port)?;
        load_env_path_opt("STREAM_CATALOG", &mut config.catalog_file);
        load_env_string("OBSERVATION_INPUT", &mut config.input);
        load_env_path_opt("CONFIG_FILE", &mut config.config_file);

        if let Ok(value) = std::env::var("PERFORMANCE_PROFILE") {
            config.profile = Some(Profile::from_str(&value, true).map_err(|_| {
                ConfigError::EnvError(format!("Invalid PERFORMANCE_PROFILE: {value}"))
            })?);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        if let Some(profile) = self.profile {
            let preset = profile.settings();
            self.batch_interval_secs = preset.batch_interval_secs;
            self.max_batch_size = preset.max_batch_size;
            self.buffer_strategy = preset.buffer_strategy;
            self.retry_queue_size = preset.retry_queue_size;
        }

        self.batch_interval = Duration::from_secs(self.batch_interval_secs);
        self.request_timeout = Duration::from_secs(self.request_timeout_secs);
        self.flush_check_interval = Duration::from_secs(self.flush_check_interval_secs);
        self.retry_interval = Duration::from_secs(self.retry_interval_secs);

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;

        let positive = [
            ("Batch interval", self.batch_interval_secs),
            ("Request timeout", self.request_timeout_secs),
            ("Flush check interval", self.flush_check_interval_secs),
            ("Retry interval", self.retry_interval_secs),
            ("Adaptive minimum interval", self.adaptive_min_interval_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidConfig(format!(
                "{name} must be greater than 0"
            )));
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max batch size must be greater than 0".to_string(),
            ));
        }

        if self.adaptive_min_interval_secs > self.adaptive_max_interval_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "Adaptive minimum interval ({}s) exceeds maximum ({}s)",
                self.adaptive_min_interval_secs, self.adaptive_max_interval_secs
            )));
        }

        if !self.change_threshold.is_finite() || self.change_threshold < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "Change threshold must be a non-negative number".to_string(),
            ));
        }

        if self.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "Retry max attempts must be greater than 0".to_string(),
            ));
        }

        if !self.retry_base_delay_secs.is_finite() || self.retry_base_delay_secs <= 0.0 {
            return Err(ConfigError::InvalidConfig(
                "Retry base delay must be greater than 0".to_string(),
            ));
        }

        if !self.retry_max_delay_secs.is_finite()
            || self.retry_max_delay_secs < self.retry_base_delay_secs
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Retry max delay ({}s) must be at least the base delay ({}s)",
                self.retry_max_delay_secs, self.retry_base_delay_secs
            )));
        }

        if self.retry_queue_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Retry queue size must be greater than 0".to_string(),
            ));
        }

        if let Some(path) = &self.catalog_file
            && !path.exists()
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Stream catalog does not exist: {}",
                path.display()
            )));
        }

        Ok(())
    }

    pub fn buffer_settings(&self) -> BufferSettings {
        BufferSettings {
            strategy: self.buffer_strategy,
            time_interval: self.batch_interval,
            size_limit: self.max_batch_size,
            adaptive_min_interval: Duration::from_secs(self.adaptive_min_interval_secs),
            adaptive_max_interval: Duration::from_secs(self.adaptive_max_interval_secs),
            priority_threshold: self.priority_threshold,
        }
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            stale_threshold: (self.stale_threshold_secs > 0)
                .then(|| Duration::from_secs(self.stale_threshold_secs)),
            validate_ranges: self.validate_ranges,
            track_changes_only: self.track_changes_only,
            change_threshold: self.change_threshold,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_secs_f64(self.retry_base_delay_secs),
            max_delay: Duration::from_secs_f64(self.retry_max_delay_secs),
            max_queue_size: self.retry_queue_size,
            jitter: self.retry_jitter,
        }
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            endpoint: self.endpoint.clone(),
            auth_token: self.auth_token.clone(),
            timeout: self.request_timeout,
            enable_compression: self.enable_compression,
            ..HttpTransportConfig::default()
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            buffer: self.buffer_settings(),
            validator: self.validator_config(),
            retry: self.retry_config(),
        }
    }
}

/// Helper function to load and parse an environment variable.
/// Returns Ok(()) if the variable doesn't exist (keeps default).
fn load_env_var<T>(name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

/// Case-insensitive counterpart of [`load_env_var`] for clap value enums.
fn load_env_enum<T: ValueEnum>(name: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(name) {
        *target = T::from_str(&value, true)
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

fn load_env_string_opt(name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(value);
    }
}

fn load_env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

fn load_env_path_opt(name: &str, target: &mut Option<PathBuf>) {
    if let Ok(value) = std::env::var(name) {
        *target = Some(PathBuf::from(value));
    }
}
