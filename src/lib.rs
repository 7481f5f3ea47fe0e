pub mod record;
pub mod fetcher;
pub mod cache;
pub mod normalize;
pub mod filter;
pub mod aggregate;
pub mod export;
pub mod pipeline;
pub mod config;
pub mod server;

pub use record::{Record, Table, Value};
pub use fetcher::{Fetcher, FetcherConfig, FetchError, HttpPageSource, InMemoryPageSource, PageSource};
pub use cache::{Clock, ManualClock, ResultCache, SystemClock};
pub use normalize::{ColumnKind, ColumnSpec, CoercionError, NormalizedTable, Normalizer};
pub use filter::{apply_filters, DateRange, FilterOutcome, FilterSpec, Selection};
pub use aggregate::{
    AggregateResult, AggregateSettings, Aggregator, Granularity, RankEntry, Ranking,
    SurveyAggregator,
};
pub use export::{from_csv, to_csv, ExportError};
pub use pipeline::{DashboardState, DashboardView, Pipeline, PipelineSettings};
pub use config::{ConfigError, DashboardConfig};
pub use server::{run_server, ApiError, AppState, ServerConfig};
