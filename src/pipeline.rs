//! One-way dashboard pipeline: fetch, cache, normalize, filter, aggregate.

use crate::aggregate::{AggregateResult, AggregateSettings, Aggregator, SurveyAggregator};
use crate::cache::{Clock, ResultCache};
use crate::config::DashboardConfig;
use crate::fetcher::{FetchError, Fetcher, HttpPageSource};
use crate::filter::{apply_filters, FilterOutcome, FilterSpec};
use crate::normalize::{NormalizedTable, Normalizer};
use crate::record::Table;
use std::time::Duration;

/// Advisory shown when filters leave no rows.
pub const NO_DATA_MESSAGE: &str =
    "No data matches the current filters. Please adjust the filters or date range.";

/// Settings for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub endpoint: String,
    pub cache_ttl: Duration,
    pub aggregate: AggregateSettings,
}

/// Filtered rows plus their aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub table: Table,
    pub aggregates: AggregateResult,
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardState {
    Ready(Box<DashboardView>),
    /// Filters eliminated every row; aggregation was skipped
    NoData { message: String },
    /// Fetching failed; nothing downstream ran
    Failed { message: String, error: FetchError },
}

impl DashboardState {
    pub fn is_ready(&self) -> bool {
        matches!(self, DashboardState::Ready(_))
    }
}

pub struct Pipeline {
    fetcher: Fetcher,
    normalizer: Normalizer,
    aggregator: Box<dyn Aggregator>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        fetcher: Fetcher,
        normalizer: Normalizer,
        aggregator: Box<dyn Aggregator>,
        settings: PipelineSettings,
    ) -> Self {
        Pipeline {
            fetcher,
            normalizer,
            aggregator,
            settings,
        }
    }

    /// Wires the HTTP page source and survey aggregator from configuration.
    ///
    /// # Errors
    /// Returns `FetchError::ClientCreation` if the HTTP client cannot be built.
    pub fn from_config(config: &DashboardConfig) -> Result<Self, FetchError> {
        let source = HttpPageSource::new(config.auth_token.clone(), &config.fetcher)?;
        Ok(Pipeline::new(
            Fetcher::new(Box::new(source), config.fetcher.clone()),
            Normalizer::for_columns(&config.allowed_columns),
            Box::new(SurveyAggregator),
            config.pipeline_settings(),
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Fetches through the cache and normalizes the result.
    ///
    /// # Errors
    /// Propagates network and decode failures from the fetcher.
    pub async fn load<C: Clock>(&self, cache: &ResultCache<C>) -> Result<NormalizedTable, FetchError> {
        let endpoint = &self.settings.endpoint;
        let raw = cache
            .get_or_fetch(endpoint, self.settings.cache_ttl, || self.fetcher.fetch(endpoint))
            .await?;
        Ok(self.normalizer.normalize(&raw))
    }

    /// Runs the full pipeline for one set of filter selections.
    pub async fn run<C: Clock>(&self, cache: &ResultCache<C>, spec: &FilterSpec) -> DashboardState {
        self.run_with(cache, spec, &self.settings.aggregate).await
    }

    /// Like [`Pipeline::run`] with per-call aggregate settings.
    pub async fn run_with<C: Clock>(
        &self,
        cache: &ResultCache<C>,
        spec: &FilterSpec,
        aggregate: &AggregateSettings,
    ) -> DashboardState {
        let normalized = match self.load(cache).await {
            Ok(table) => table,
            Err(error) => {
                log::warn!("Dashboard fetch failed: {}", error);
                return DashboardState::Failed {
                    message: format!("Failed to fetch data: {}", error),
                    error,
                };
            }
        };

        match apply_filters(normalized.table(), spec) {
            FilterOutcome::Empty => DashboardState::NoData {
                message: NO_DATA_MESSAGE.to_string(),
            },
            FilterOutcome::Rows(table) => {
                let aggregates = self.aggregator.aggregate(&table, aggregate);
                DashboardState::Ready(Box::new(DashboardView { table, aggregates }))
            }
        }
    }

    /// Drops the cached fetch so the next run hits the endpoint.
    pub async fn refresh<C: Clock>(&self, cache: &ResultCache<C>) {
        cache.invalidate(&self.settings.endpoint).await;
    }
}
