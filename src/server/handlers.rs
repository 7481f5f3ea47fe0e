//! HTTP request handlers for API endpoints

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ApiError;
use super::state::AppState;
use crate::aggregate::{AggregateResult, AggregateSettings, Granularity};
use crate::export::{to_csv, DEFAULT_EXPORT_FILE_NAME};
use crate::filter::{
    apply_filters, filter_options, DateRange, FilterOptions, FilterOutcome, FilterSpec, Selection,
};
use crate::normalize::{
    ColumnKind, DISTRICT_OF_RESIDENCE, EDUCATION_LEVEL, FIELD_OF_STUDY, INSTITUTION_NAME,
};
use crate::pipeline::{DashboardState, NO_DATA_MESSAGE};
use crate::record::{Table, Value};

/// Columns offered as sidebar filters, in cascade order.
const SIDEBAR_FILTERS: [&str; 4] = [
    INSTITUTION_NAME,
    FIELD_OF_STUDY,
    EDUCATION_LEVEL,
    DISTRICT_OF_RESIDENCE,
];

/// Health check endpoint
pub async fn health_check() -> Json<JsonValue> {
    Json(json!({
        "status": "ok"
    }))
}

/// Filter selections decoded from the query string.
struct DashboardQuery {
    spec: FilterSpec,
    granularity: Option<Granularity>,
}

/// Decodes `?column=value&start=..&end=..&granularity=..`.
///
/// Any non-timestamp allowed column may be used as a categorical filter.
fn parse_query(state: &AppState, params: &HashMap<String, String>) -> Result<DashboardQuery, ApiError> {
    let categorical: Vec<&str> = state
        .pipeline
        .normalizer()
        .columns()
        .iter()
        .filter(|spec| spec.kind != ColumnKind::Timestamp)
        .map(|spec| spec.name.as_str())
        .collect();

    let mut spec = FilterSpec::new();
    let mut granularity = None;

    for (key, value) in params {
        match key.as_str() {
            "start" | "end" => {}
            "granularity" => {
                granularity = Some(
                    value
                        .parse::<Granularity>()
                        .map_err(ApiError::InvalidParameter)?,
                );
            }
            column if categorical.contains(&column) => {
                spec = spec.with_selection(column, Selection::parse(value));
            }
            other => {
                return Err(ApiError::InvalidParameter(format!(
                    "Unknown filter: {}",
                    other
                )));
            }
        }
    }

    match (params.get("start"), params.get("end")) {
        (Some(start), Some(end)) => {
            let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
                .map_err(|e| ApiError::InvalidDateRange(format!("Invalid start date: {}", e)))?;
            let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
                .map_err(|e| ApiError::InvalidDateRange(format!("Invalid end date: {}", e)))?;
            if start > end {
                return Err(ApiError::InvalidDateRange(
                    "Start date must be before or equal to end date".to_string(),
                ));
            }
            spec = spec.with_date_range(DateRange::new(start, end));
        }
        (None, None) => {}
        _ => {
            return Err(ApiError::InvalidDateRange(
                "Both start and end must be given".to_string(),
            ));
        }
    }

    Ok(DashboardQuery { spec, granularity })
}

/// Dashboard payload: aggregates, or the no-data advisory.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DashboardResponse {
    Ok {
        row_count: usize,
        aggregates: AggregateResult,
    },
    NoData {
        message: String,
    },
}

/// GET /dashboard - KPIs, detail panels and chart data
pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let query = parse_query(&state, &params)?;
    let mut settings: AggregateSettings = state.pipeline.settings().aggregate;
    if let Some(granularity) = query.granularity {
        settings.granularity = granularity;
    }

    match state
        .pipeline
        .run_with(&state.cache, &query.spec, &settings)
        .await
    {
        DashboardState::Ready(view) => Ok(Json(DashboardResponse::Ok {
            row_count: view.table.len(),
            aggregates: view.aggregates,
        })),
        DashboardState::NoData { message } => Ok(Json(DashboardResponse::NoData { message })),
        DashboardState::Failed { error, .. } => Err(error.into()),
    }
}

/// Filtered rows as column-ordered arrays.
#[derive(Debug, Serialize)]
pub struct SubmissionsResponse {
    pub status: &'static str,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn rows_of(table: &Table) -> Vec<Vec<Value>> {
    (0..table.len())
        .map(|row| {
            table
                .columns()
                .iter()
                .map(|column| table.value(row, column).clone())
                .collect()
        })
        .collect()
}

/// Loads and filters without aggregating.
async fn filtered_table(state: &AppState, spec: &FilterSpec) -> Result<(Vec<String>, FilterOutcome), ApiError> {
    let normalized = state.pipeline.load(&state.cache).await?;
    let columns = normalized.columns().to_vec();
    Ok((columns, apply_filters(normalized.table(), spec)))
}

/// GET /submissions - Filtered table for the raw-data view
pub async fn get_submissions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SubmissionsResponse>, ApiError> {
    let query = parse_query(&state, &params)?;
    let (columns, outcome) = filtered_table(&state, &query.spec).await?;

    let response = match outcome {
        FilterOutcome::Rows(table) => SubmissionsResponse {
            status: "ok",
            columns,
            rows: rows_of(&table),
            message: None,
        },
        FilterOutcome::Empty => SubmissionsResponse {
            status: "no_data",
            columns,
            rows: Vec::new(),
            message: Some(NO_DATA_MESSAGE.to_string()),
        },
    };
    Ok(Json(response))
}

/// GET /submissions/export - Filtered table as a CSV download
pub async fn export_submissions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let query = parse_query(&state, &params)?;
    let (columns, outcome) = filtered_table(&state, &query.spec).await?;
    let table = outcome
        .rows()
        .unwrap_or_else(|| Table::with_columns(columns));

    let body = to_csv(&table)?;
    let disposition = format!("attachment; filename=\"{}\"", DEFAULT_EXPORT_FILE_NAME);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// GET /filters - Selectable values for each sidebar filter
pub async fn get_filter_options(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<FilterOptions>, ApiError> {
    let query = parse_query(&state, &params)?;
    let normalized = state.pipeline.load(&state.cache).await?;
    Ok(Json(filter_options(
        normalized.table(),
        &query.spec,
        &SIDEBAR_FILTERS,
    )))
}

/// POST /refresh - Drop cached data so the next request refetches
pub async fn refresh(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    state.pipeline.refresh(&state.cache).await;
    tracing::info!("Cache cleared on request");
    Json(json!({
        "status": "cache_cleared",
        "message": "Cache cleared! Data will refresh automatically."
    }))
}
