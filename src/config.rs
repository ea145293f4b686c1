//! Configuration management for the weather advisory service
//!
//! Handles loading configuration from files, environment variables,
//! and provides validation for all configuration settings.

use crate::AdvisoryError;
use anyhow::{Context, Result};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    /// Forecast provider settings
    pub forecast: ForecastConfig,
    /// Generative provider settings, throttle and backoff
    pub generator: GeneratorConfig,
    /// Batch grouping settings
    pub batch: BatchConfig,
    /// Document store settings
    pub store: StoreConfig,
    /// Push provider settings
    pub push: PushConfig,
    /// Daily trigger settings
    pub schedule: ScheduleConfig,
    /// HTTP server settings
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Base URL; the padded region code and `.json` are appended
    pub base_url: String,
    pub timeout_seconds: u32,
    /// Fixed width of provider region identifiers
    pub code_width: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u32,
    /// Minimum spacing between provider calls, process-wide
    pub min_interval_ms: u64,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Total provider attempts per `generate` call before giving up on rate limits
    pub max_retries: u32,
    pub max_advisory_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Regions processed concurrently per group
    pub group_size: usize,
    /// Pause between consecutive groups
    pub group_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file location
    pub path: String,
    /// Keep documents in memory only
    pub ephemeral: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    /// Notification title shown on devices
    pub title: String,
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// IANA timezone that defines the calendar day and trigger hours
    pub timezone: String,
    pub generate_hour: u32,
    pub notify_hour: u32,
    /// Wall-clock ceiling for one scheduled run
    pub run_timeout_seconds: u64,
    /// Whole-run retries after a failed or timed-out run
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub admin_user: String,
    /// Shared secret for the notification test harness
    pub test_secret: Option<String>,
    /// Shared secret for the migration endpoint
    pub migration_secret: Option<String>,
    pub request_timeout_seconds: u64,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (pretty or json)
    pub format: String,
}

// Default value functions
fn default_forecast_base_url() -> String {
    "https://www.jma.go.jp/bosai/forecast/data/forecast".to_string()
}

fn default_generator_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_push_base_url() -> String {
    "https://exp.host/--/api/v2/push/send".to_string()
}

fn default_store_path() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("weather-advisory").join("documents.redb"))
        .unwrap_or_else(|| PathBuf::from("documents.redb"))
        .to_string_lossy()
        .into_owned()
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_url: default_forecast_base_url(),
            timeout_seconds: 30,
            code_width: 6,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_generator_base_url(),
            timeout_seconds: 60,
            min_interval_ms: 1000,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 32_000,
            max_retries: 5,
            max_advisory_chars: 200,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            group_size: 5,
            group_interval_seconds: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            ephemeral: false,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            base_url: default_push_base_url(),
            access_token: None,
            title: "Today's weather".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Tokyo".to_string(),
            generate_hour: 6,
            notify_hour: 7,
            run_timeout_seconds: 540,
            retry_count: 3,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            admin_user: "admin".to_string(),
            test_secret: None,
            migration_secret: None,
            request_timeout_seconds: 540,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl GeneratorConfig {
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl BatchConfig {
    #[must_use]
    pub fn group_interval(&self) -> Duration {
        Duration::from_secs(self.group_interval_seconds)
    }
}

impl ScheduleConfig {
    /// Parse the configured timezone
    pub fn tz(&self) -> std::result::Result<Tz, AdvisoryError> {
        self.timezone.parse::<Tz>().map_err(|_| {
            AdvisoryError::config(format!("Unknown timezone '{}'", self.timezone))
        })
    }
}

impl AdvisoryConfig {
    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // WEATHER_ADVISORY_GENERATOR__API_KEY -> generator.api_key
        builder = builder.add_source(
            Environment::with_prefix("WEATHER_ADVISORY")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let mut config: AdvisoryConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        config.apply_defaults();
        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("weather-advisory").join("config.toml"))
    }

    /// Apply default values to empty string fields
    pub fn apply_defaults(&mut self) {
        if self.forecast.base_url.is_empty() {
            self.forecast.base_url = default_forecast_base_url();
        }
        if self.generator.base_url.is_empty() {
            self.generator.base_url = default_generator_base_url();
        }
        if self.generator.model.is_empty() {
            self.generator.model = default_model();
        }
        if self.push.base_url.is_empty() {
            self.push.base_url = default_push_base_url();
        }
        if self.store.path.is_empty() {
            self.store.path = default_store_path();
        }
        if self.logging.level.is_empty() {
            self.logging.level = LoggingConfig::default().level;
        }
        if self.logging.format.is_empty() {
            self.logging.format = LoggingConfig::default().format;
        }
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.batch.group_size == 0 || self.batch.group_size > 50 {
            return Err(AdvisoryError::config("Batch group size must be between 1 and 50").into());
        }

        if self.generator.max_retries == 0 || self.generator.max_retries > 10 {
            return Err(AdvisoryError::config(
                "Generator max retries must be between 1 and 10",
            )
            .into());
        }

        if self.generator.initial_retry_delay_ms > self.generator.max_retry_delay_ms {
            return Err(AdvisoryError::config(
                "Generator initial retry delay cannot exceed the maximum retry delay",
            )
            .into());
        }

        if self.forecast.code_width == 0 {
            return Err(AdvisoryError::config("Forecast code width must be positive").into());
        }

        if self.schedule.generate_hour > 23 || self.schedule.notify_hour > 23 {
            return Err(AdvisoryError::config("Schedule hours must be between 0 and 23").into());
        }

        Ok(())
    }

    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(AdvisoryError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(AdvisoryError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        for (name, url) in [
            ("Forecast", &self.forecast.base_url),
            ("Generator", &self.generator.base_url),
            ("Push", &self.push.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AdvisoryError::config(format!(
                    "{name} base URL must be a valid HTTP or HTTPS URL"
                ))
                .into());
            }
        }

        self.schedule.tz()?;

        Ok(())
    }
}
