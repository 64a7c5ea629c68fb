//! Session configuration.
//!
//! [`PrepConfig`] gathers every tunable of a prep session: scheduling
//! ratios, retry limits, poll intervals, search pacing, display timing, and
//! where sessions are staged. Defaults match a normal interactive run;
//! `PREP_*` environment variables override them.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::agents::dedup::DEFAULT_SIMILARITY_THRESHOLD;
use crate::agents::organizer::DEFAULT_ANALYSIS_INTERVAL;
use crate::agents::{RetryConfig, SearchConfig, DEFAULT_CONSUMER_POLL, DEFAULT_PRODUCER_POLL};
use crate::scheduler::SchedulerConfig;

/// Errors that can occur while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// How long idle agents wait before checking for work again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub producer: Duration,
    pub consumer: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            producer: DEFAULT_PRODUCER_POLL,
            consumer: DEFAULT_CONSUMER_POLL,
        }
    }
}

/// Status display timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    /// Time between redraws.
    pub refresh_interval: Duration,
    /// Pause between spawning the display and spawning the agents.
    pub startup_delay: Duration,
    /// Settle pause before the first frame.
    pub first_frame_pause: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(500),
            startup_delay: Duration::from_millis(100),
            first_frame_pause: Duration::from_millis(50),
        }
    }
}

/// Configuration for one prep session.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepConfig {
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub poll: PollConfig,
    pub search: SearchConfig,
    pub display: DisplayConfig,
    /// Directory holding one staging directory per session.
    pub staging_root: PathBuf,
    /// Placed cards between organizer analyses.
    pub analysis_interval: usize,
    /// Jaccard similarity above which two arguments are duplicates.
    pub similarity_threshold: f64,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            search: SearchConfig::default(),
            display: DisplayConfig::default(),
            staging_root: PathBuf::from("./staging"),
            analysis_interval: DEFAULT_ANALYSIS_INTERVAL,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl PrepConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PREP_STAGING_ROOT`: Session staging directory (default: ./staging)
    /// - `PREP_PRIORITY_RATIO`: Stock tasks per round (default: 4)
    /// - `PREP_OTHER_RATIO`: Other-class tasks per round (default: 1)
    /// - `PREP_MAX_RETRIES`: Attempts before an item fails (default: 3)
    /// - `PREP_RETRY_DELAY_MS`: Cooldown after a failed attempt (default: 2000)
    /// - `PREP_PRODUCER_POLL_MS`: Pause between generation rounds (default: 5000)
    /// - `PREP_CONSUMER_POLL_MS`: Idle wait for consumers (default: 2000)
    /// - `PREP_FETCH_CONCURRENCY`: Parallel page fetches (default: 3)
    /// - `PREP_SEARCH_DELAY_MS`: Minimum spacing between searches (default: 1000)
    /// - `PREP_RESULTS_PER_SEARCH`: Hits requested per search (default: 20)
    /// - `PREP_REFRESH_MS`: Display refresh interval (default: 500)
    /// - `PREP_STARTUP_DELAY_MS`: Delay before agents start (default: 100)
    /// - `PREP_ANALYSIS_INTERVAL`: Cards between brief analyses (default: 3)
    /// - `PREP_SIMILARITY_THRESHOLD`: Duplicate-argument threshold (default: 0.55)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PrepConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("PREP_STAGING_ROOT") {
            config.staging_root = PathBuf::from(val);
        }

        // Scheduling
        if let Some(val) = lookup("PREP_PRIORITY_RATIO") {
            config.scheduler.priority_ratio = parse_env_value(&val, "PREP_PRIORITY_RATIO")?;
        }
        if let Some(val) = lookup("PREP_OTHER_RATIO") {
            config.scheduler.other_ratio = parse_env_value(&val, "PREP_OTHER_RATIO")?;
        }
        if let Some(val) = lookup("PREP_MAX_RETRIES") {
            config.retry.max_retries = parse_env_value(&val, "PREP_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("PREP_RETRY_DELAY_MS") {
            config.retry.retry_delay = parse_env_millis(&val, "PREP_RETRY_DELAY_MS")?;
        }

        // Polling
        if let Some(val) = lookup("PREP_PRODUCER_POLL_MS") {
            config.poll.producer = parse_env_millis(&val, "PREP_PRODUCER_POLL_MS")?;
        }
        if let Some(val) = lookup("PREP_CONSUMER_POLL_MS") {
            config.poll.consumer = parse_env_millis(&val, "PREP_CONSUMER_POLL_MS")?;
        }

        // Search
        if let Some(val) = lookup("PREP_FETCH_CONCURRENCY") {
            config.search.fetch_concurrency = parse_env_value(&val, "PREP_FETCH_CONCURRENCY")?;
        }
        if let Some(val) = lookup("PREP_SEARCH_DELAY_MS") {
            config.search.search_delay = parse_env_millis(&val, "PREP_SEARCH_DELAY_MS")?;
        }
        if let Some(val) = lookup("PREP_RESULTS_PER_SEARCH") {
            config.search.results_per_search = parse_env_value(&val, "PREP_RESULTS_PER_SEARCH")?;
        }

        // Display
        if let Some(val) = lookup("PREP_REFRESH_MS") {
            config.display.refresh_interval = parse_env_millis(&val, "PREP_REFRESH_MS")?;
        }
        if let Some(val) = lookup("PREP_STARTUP_DELAY_MS") {
            config.display.startup_delay = parse_env_millis(&val, "PREP_STARTUP_DELAY_MS")?;
        }

        if let Some(val) = lookup("PREP_ANALYSIS_INTERVAL") {
            config.analysis_interval = parse_env_value(&val, "PREP_ANALYSIS_INTERVAL")?;
        }
        if let Some(val) = lookup("PREP_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = parse_env_value(&val, "PREP_SIMILARITY_THRESHOLD")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.priority_ratio == 0 || self.scheduler.other_ratio == 0 {
            return Err(ConfigError::ValidationFailed(
                "scheduler ratios must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        if self.poll.producer.is_zero() || self.poll.consumer.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll intervals must be greater than 0".to_string(),
            ));
        }

        if self.search.fetch_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "fetch_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.search.results_per_search == 0 {
            return Err(ConfigError::ValidationFailed(
                "results_per_search must be greater than 0".to_string(),
            ));
        }

        if self.display.refresh_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "refresh_interval must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::ValidationFailed(
                "similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.staging_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "staging_root cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_display(mut self, display: DisplayConfig) -> Self {
        self.display = display;
        self
    }

    pub fn with_analysis_interval(mut self, interval: usize) -> Self {
        self.analysis_interval = interval;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable holding milliseconds.
fn parse_env_millis(value: &str, key: &str) -> Result<Duration, ConfigError> {
    parse_env_value::<u64>(value, key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PrepConfig::default();
        assert_eq!(config.scheduler, SchedulerConfig::new(4, 1));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.retry_delay, Duration::from_secs(2));
        assert_eq!(config.poll.producer, Duration::from_secs(5));
        assert_eq!(config.poll.consumer, Duration::from_secs(2));
        assert_eq!(config.search.fetch_concurrency, 3);
        assert_eq!(config.search.search_delay, Duration::from_secs(1));
        assert_eq!(config.display.refresh_interval, Duration::from_millis(500));
        assert_eq!(config.display.startup_delay, Duration::from_millis(100));
        assert_eq!(config.staging_root, PathBuf::from("./staging"));
        assert_eq!(config.analysis_interval, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PrepConfig::from_lookup(lookup(&[
            ("PREP_PRIORITY_RATIO", "6"),
            ("PREP_MAX_RETRIES", "5"),
            ("PREP_RETRY_DELAY_MS", "250"),
            ("PREP_STAGING_ROOT", "/tmp/prep"),
            ("PREP_SIMILARITY_THRESHOLD", "0.7"),
        ]))
        .unwrap();
        assert_eq!(config.scheduler.priority_ratio, 6);
        assert_eq!(config.scheduler.other_ratio, 1);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.retry_delay, Duration::from_millis(250));
        assert_eq!(config.staging_root, PathBuf::from("/tmp/prep"));
        assert!((config.similarity_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_value() {
        let err = PrepConfig::from_lookup(lookup(&[("PREP_FETCH_CONCURRENCY", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PREP_FETCH_CONCURRENCY"));
    }

    #[test]
    fn test_validation_failures() {
        let config = PrepConfig::default().with_scheduler(SchedulerConfig::new(0, 1));
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        let config = PrepConfig::default().with_retry(RetryConfig {
            max_retries: 0,
            retry_delay: Duration::ZERO,
        });
        assert!(config.validate().is_err());

        let config = PrepConfig::default().with_similarity_threshold(1.5);
        assert!(config.validate().is_err());

        let err = PrepConfig::from_lookup(lookup(&[("PREP_OTHER_RATIO", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed(_)));
    }
}
