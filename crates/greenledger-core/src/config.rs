//! Runtime configuration shared by the pipeline crates.
//!
//! Every field has a default, so an empty YAML document is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreenledgerConfig {
    pub mapper: MapperConfig,
    pub gaps: GapConfig,
    pub alerts: AlertConfig,
    pub pipeline: PipelineConfig,
    pub schedule: ScheduleConfig,
    pub reporting: ReportingConfig,
}

impl GreenledgerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.mapper.acceptance_threshold;
        if !(0.0..=1.0).contains(&threshold) || threshold == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "mapper.acceptance_threshold must be in (0, 1], got {threshold}"
            )));
        }
        if self.alerts.critical_within_days > self.gaps.warning_window_days {
            return Err(ConfigError::Invalid(format!(
                "alerts.critical_within_days ({}) exceeds gaps.warning_window_days ({})",
                self.alerts.critical_within_days, self.gaps.warning_window_days
            )));
        }
        if self.pipeline.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.pipeline.retry.base_delay_ms > self.pipeline.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "pipeline.retry.base_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        if self.pipeline.extraction_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.extraction_timeout_secs must be positive".into(),
            ));
        }
        if self.pipeline.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_concurrent_runs must be positive".into(),
            ));
        }
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.interval_secs must be positive".into(),
            ));
        }
        if !(1..=12).contains(&self.reporting.fiscal_year_start_month) {
            return Err(ConfigError::Invalid(format!(
                "reporting.fiscal_year_start_month must be 1..=12, got {}",
                self.reporting.fiscal_year_start_month
            )));
        }
        Ok(())
    }
}

/// Mapper policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Minimum match score for a candidate to enter the ledger.
    pub acceptance_threshold: f32,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.75,
        }
    }
}

/// Gap detection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    /// Evidence expiring within this many days is reported as `Expiring`.
    pub warning_window_days: u32,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            warning_window_days: 30,
        }
    }
}

/// Alerting policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// `Expiring` gaps with at most this many days left are critical.
    pub critical_within_days: u32,
    /// Deliver informational roll-up alerts to the sink.
    pub deliver_info: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            critical_within_days: 7,
            deliver_info: false,
        }
    }
}

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// Document pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub extraction_timeout_secs: u64,
    pub max_concurrent_runs: usize,
}

impl PipelineConfig {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            extraction_timeout_secs: 30,
            max_concurrent_runs: 8,
        }
    }
}

/// Compliance cycle schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_secs: 900 }
    }
}

/// Reporting calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub fiscal_year_start_month: u32,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            fiscal_year_start_month: 1,
        }
    }
}
