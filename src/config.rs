//! Dashboard configuration sourced from environment variables.

use crate::aggregate::{AggregateSettings, Granularity};
use crate::fetcher::FetcherConfig;
use crate::normalize::SURVEY_COLUMNS;
use crate::pipeline::PipelineSettings;
use std::str::FromStr;
use std::time::Duration;

/// Default KoboToolbox server.
pub const DEFAULT_BASE_URL: &str = "https://kf.kobotoolbox.org";

/// Configuration for a dashboard instance
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// First page of submission data
    pub endpoint: String,
    /// Static API token sent as `Authorization: Token <value>`
    pub auth_token: String,
    /// How long a fetch stays fresh (default: 60)
    pub cache_ttl_seconds: u64,
    /// Columns kept by the normalizer, in display order
    pub allowed_columns: Vec<String>,
    pub aggregate: AggregateSettings,
    pub fetcher: FetcherConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            endpoint: String::new(),
            auth_token: String::new(),
            cache_ttl_seconds: 60,
            allowed_columns: SURVEY_COLUMNS.iter().map(|c| c.to_string()).collect(),
            aggregate: AggregateSettings::default(),
            fetcher: FetcherConfig::default(),
        }
    }
}

impl DashboardConfig {
    /// Creates a configuration with defaults for everything but endpoint and token.
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Self {
        DashboardConfig {
            endpoint: endpoint.into(),
            auth_token: auth_token.into(),
            ..DashboardConfig::default()
        }
    }

    /// Reads configuration from the process environment.
    ///
    /// # Errors
    /// See [`DashboardConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from a key lookup.
    ///
    /// Recognized keys: `KOBO_TOKEN` (required), `ASSET_ID` or
    /// `DASHBOARD_ENDPOINT` (one required), `KOBO_BASE_URL`,
    /// `CACHE_TTL_SECONDS`, `ALLOWED_COLUMNS`, `DETAIL_TOP_N`, `CHART_TOP_N`,
    /// `GRANULARITY`, `MAX_PAGES`, `REQUEST_TIMEOUT_SECONDS`.
    ///
    /// # Errors
    /// Returns `ConfigError::Missing` for absent required keys and
    /// `ConfigError::Invalid` for values that do not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = DashboardConfig::default();

        config.auth_token = get("KOBO_TOKEN").ok_or(ConfigError::Missing("KOBO_TOKEN"))?;

        config.endpoint = match (get("DASHBOARD_ENDPOINT"), get("ASSET_ID")) {
            (Some(endpoint), _) => endpoint,
            (None, Some(asset_id)) => {
                let base = get("KOBO_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
                asset_data_url(&base, &asset_id)
            }
            (None, None) => return Err(ConfigError::Missing("ASSET_ID")),
        };

        if let Some(ttl) = get("CACHE_TTL_SECONDS") {
            config.cache_ttl_seconds = parse_value("CACHE_TTL_SECONDS", &ttl)?;
        }
        if let Some(columns) = get("ALLOWED_COLUMNS") {
            config.allowed_columns = columns
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(n) = get("DETAIL_TOP_N") {
            config.aggregate.detail_top_n = parse_value("DETAIL_TOP_N", &n)?;
        }
        if let Some(n) = get("CHART_TOP_N") {
            config.aggregate.chart_top_n = parse_value("CHART_TOP_N", &n)?;
        }
        if let Some(granularity) = get("GRANULARITY") {
            config.aggregate.granularity = granularity
                .parse::<Granularity>()
                .map_err(|msg| ConfigError::Invalid("GRANULARITY", msg))?;
        }
        if let Some(pages) = get("MAX_PAGES") {
            config.fetcher.max_pages = parse_value("MAX_PAGES", &pages)?;
        }
        if let Some(timeout) = get("REQUEST_TIMEOUT_SECONDS") {
            config.fetcher.timeout_seconds = parse_value("REQUEST_TIMEOUT_SECONDS", &timeout)?;
        }

        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            endpoint: self.endpoint.clone(),
            cache_ttl: self.cache_ttl(),
            aggregate: self.aggregate,
        }
    }
}

/// JSON data URL for a KoboToolbox asset.
pub fn asset_data_url(base_url: &str, asset_id: &str) -> String {
    format!(
        "{}/api/v2/assets/{}/data/?format=json",
        base_url.trim_end_matches('/'),
        asset_id
    )
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::Invalid(key, format!("'{}': {}", raw, e)))
}

/// Errors that can occur while reading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required key not set
    Missing(&'static str),
    /// Key set to an unusable value
    Invalid(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} is not set", key),
            ConfigError::Invalid(key, msg) => write!(f, "Invalid {}: {}", key, msg),
        }
    }
}

impl std::error::Error for ConfigError {}
