//! Shared application state for the API server

use crate::cache::ResultCache;
use crate::config::DashboardConfig;
use crate::fetcher::FetchError;
use crate::pipeline::Pipeline;

/// Shared application state
///
/// The cache is owned here and lent to the pipeline on every request.
pub struct AppState {
    pub pipeline: Pipeline,
    pub cache: ResultCache,
}

impl AppState {
    pub fn new(pipeline: Pipeline, cache: ResultCache) -> Self {
        AppState { pipeline, cache }
    }

    /// Builds the HTTP-backed pipeline with an empty cache.
    pub fn from_config(config: &DashboardConfig) -> Result<Self, FetchError> {
        Ok(AppState::new(Pipeline::from_config(config)?, ResultCache::new()))
    }
}
