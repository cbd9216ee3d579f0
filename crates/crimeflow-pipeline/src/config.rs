//! Pipeline configuration, read from a JSON file. Every field has a default, so `{}` is a valid
//! configuration for the Boston deployment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crimeflow_frame::Encoding;
use crimeflow_types::{PipelineError, Result};

use crate::engine::EngineConfig;
use crate::retry::{BackoffPolicy, RetryPolicy, RetryPolicyName};

pub const DEFAULT_SHOOTINGS_URL: &str = "https://data.boston.gov/dataset/e63a37e1-be79-4722-89e6-9e7e2a3da6d1/resource/73c7e069-701f-4910-986d-b950f46c91a1/download/tmp8mntlmrz.csv";
pub const DEFAULT_KAGGLE_API: &str = "https://www.kaggle.com/api/v1";
pub const DEFAULT_METEOSTAT_URL: &str = "https://bulk.meteostat.net/v2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    pub work_dir: PathBuf,
    pub database_url: String,
    pub max_parallel: usize,
    pub retry: RetryConfig,
    pub sources: SourcesConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "boston_crimes".into(),
            work_dir: PathBuf::from(".crimeflow/runs"),
            database_url: "sqlite://crimeflow.db".into(),
            max_parallel: 1,
            retry: RetryConfig::default(),
            sources: SourcesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub retries: usize,
    pub delay_secs: u64,
    pub backoff: BackoffKind,
    /// Cap for exponential backoff.
    pub max_delay_secs: u64,
    pub policy: RetryPolicyName,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            delay_secs: 300,
            backoff: BackoffKind::Fixed,
            max_delay_secs: 3600,
            policy: RetryPolicyName::TransientOnly,
        }
    }
}

impl RetryConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let delay = Duration::from_secs(self.delay_secs);
        match self.backoff {
            _ if self.delay_secs == 0 => BackoffPolicy::None,
            BackoffKind::Fixed => BackoffPolicy::Fixed(delay),
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                base: delay,
                max: Duration::from_secs(self.max_delay_secs),
            },
        }
    }
}

/// Where one raw dataset comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Http {
        url: String,
        #[serde(default)]
        encoding: Encoding,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        encoding: Encoding,
    },
    Kaggle {
        /// `owner/name`
        dataset: String,
        /// File inside the downloaded archive.
        member: String,
        #[serde(default = "default_kaggle_api")]
        api_base: String,
        /// Falls back to `KAGGLE_USERNAME` / `KAGGLE_KEY`.
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        encoding: Encoding,
    },
    Meteostat {
        station: String,
        start: NaiveDate,
        end: NaiveDate,
        #[serde(default = "default_meteostat_url")]
        base_url: String,
    },
}

fn default_kaggle_api() -> String {
    DEFAULT_KAGGLE_API.into()
}

fn default_meteostat_url() -> String {
    DEFAULT_METEOSTAT_URL.into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub shootings: SourceConfig,
    pub crimes: SourceConfig,
    pub weather: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            shootings: SourceConfig::Http {
                url: DEFAULT_SHOOTINGS_URL.into(),
                encoding: Encoding::Latin1,
            },
            crimes: SourceConfig::Kaggle {
                dataset: "AnalyzeBoston/crimes-in-boston".into(),
                member: "crime.csv".into(),
                api_base: default_kaggle_api(),
                username: None,
                key: None,
                encoding: Encoding::Latin1,
            },
            weather: SourceConfig::Meteostat {
                station: "72509".into(),
                start: NaiveDate::from_ymd_opt(2013, 3, 1).unwrap_or_default(),
                end: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
                base_url: default_meteostat_url(),
            },
        }
    }
}

impl PipelineConfig {
    /// Read and check a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.check()?;
        tracing::debug!(path = %path.display(), name = %config.name, "Configuration loaded");
        Ok(config)
    }

    /// Reject settings no run could honour.
    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::ValidationError("pipeline name is empty".into()));
        }
        if self.max_parallel == 0 {
            return Err(PipelineError::ValidationError(
                "max_parallel must be at least 1".into(),
            ));
        }
        if let SourceConfig::Meteostat { start, end, .. } = &self.sources.weather {
            if start > end {
                return Err(PipelineError::ValidationError(format!(
                    "weather range is empty: {start} is after {end}"
                )));
            }
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            work_dir: self.work_dir.clone(),
            max_parallel: self.max_parallel,
            retries: self.retry.retries,
            backoff: self.retry.backoff_policy(),
            retry_policy: RetryPolicy::from_name(self.retry.policy),
        }
    }
}
