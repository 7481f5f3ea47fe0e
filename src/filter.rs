use crate::normalize::SUBMISSION_TIME;
use crate::record::{cell, Table};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::BTreeSet;

/// Sentinel selection meaning "no constraint".
pub const ALL: &str = "All";

/// Selected value for one categorical column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Equals(String),
}

impl Selection {
    /// Parses a selection, mapping the "All" sentinel to [`Selection::All`].
    pub fn parse(value: &str) -> Self {
        if value == ALL {
            Selection::All
        } else {
            Selection::Equals(value.to_string())
        }
    }
}

/// Date range for filtering submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    /// Start date (inclusive)
    pub start: NaiveDate,
    /// End date (inclusive, through the end of the day)
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// First and last instants covered by the range.
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        let last_instant =
            NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
        (
            self.start.and_time(NaiveTime::MIN),
            self.end.and_time(last_instant),
        )
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        let (start, end) = self.bounds();
        start <= ts && ts <= end
    }
}

/// Conjunctive set of row filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    categorical: Vec<(String, Selection)>,
    date_range: Option<DateRange>,
    timestamp_column: Option<String>,
}

impl FilterSpec {
    pub fn new() -> Self {
        FilterSpec::default()
    }

    /// Sets the selection for a column, replacing any earlier one.
    pub fn with_selection(mut self, column: impl Into<String>, selection: Selection) -> Self {
        let column = column.into();
        match self.categorical.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = selection,
            None => self.categorical.push((column, selection)),
        }
        self
    }

    pub fn with_equals(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_selection(column, Selection::Equals(value.into()))
    }

    /// Restricts rows to an inclusive date range.
    ///
    /// Without an explicit range the table's own min/max dates are used.
    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// Overrides the column the date range applies to.
    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    pub fn categorical(&self) -> &[(String, Selection)] {
        &self.categorical
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.date_range
    }

    pub fn timestamp_column(&self) -> &str {
        self.timestamp_column.as_deref().unwrap_or(SUBMISSION_TIME)
    }
}

/// Result of applying filters.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Rows(Table),
    /// Filters eliminated every row
    Empty,
}

impl FilterOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, FilterOutcome::Empty)
    }

    pub fn rows(self) -> Option<Table> {
        match self {
            FilterOutcome::Rows(table) => Some(table),
            FilterOutcome::Empty => None,
        }
    }
}

/// Keeps rows equal to `value` in `column`. Absent columns are not filtered.
pub fn filter_equals(table: &Table, column: &str, selection: &Selection) -> Table {
    match selection {
        Selection::Equals(value) if table.has_column(column) => table.filtered(|record| {
            cell(record, column).label().as_deref() == Some(value.as_str())
        }),
        _ => table.clone(),
    }
}

/// Keeps rows whose timestamp falls inside `range`; missing timestamps never match.
pub fn filter_date_range(table: &Table, column: &str, range: &DateRange) -> Table {
    if !table.has_column(column) {
        return table.clone();
    }
    table.filtered(|record| {
        cell(record, column)
            .as_timestamp()
            .map_or(false, |ts| range.contains(ts))
    })
}

/// Calendar days spanned by the earliest and latest timestamps in `column`.
pub fn default_date_range(table: &Table, column: &str) -> Option<DateRange> {
    let mut timestamps = table.column_values(column).filter_map(|v| v.as_timestamp());
    let first = timestamps.next()?;
    let (min, max) = timestamps.fold((first, first), |(min, max), ts| (min.min(ts), max.max(ts)));
    Some(DateRange::new(min.date(), max.date()))
}

/// Applies every categorical filter, then the date range.
pub fn apply_filters(table: &Table, spec: &FilterSpec) -> FilterOutcome {
    let mut filtered = spec
        .categorical()
        .iter()
        .fold(table.clone(), |acc, (column, selection)| {
            filter_equals(&acc, column, selection)
        });

    let column = spec.timestamp_column();
    let range = spec
        .date_range()
        .or_else(|| default_date_range(&filtered, column));
    if let Some(range) = range {
        filtered = filter_date_range(&filtered, column, &range);
    }

    log::debug!(
        "Filters kept {} of {} rows",
        filtered.len(),
        table.len()
    );

    if filtered.is_empty() {
        FilterOutcome::Empty
    } else {
        FilterOutcome::Rows(filtered)
    }
}

/// Selectable values for one categorical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnOptions {
    pub column: String,
    /// "All" followed by the sorted distinct values
    pub options: Vec<String>,
}

/// Choices offered to the user for the current selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub columns: Vec<ColumnOptions>,
    /// Default date range after categorical filtering
    pub date_range: Option<DateRange>,
}

/// Computes filter choices, cascading through the given columns in order.
///
/// Each column's options are drawn from the rows left by the selections on
/// the columns before it. Columns absent from the table are skipped.
pub fn filter_options(table: &Table, spec: &FilterSpec, columns: &[&str]) -> FilterOptions {
    let mut current = table.clone();
    let mut options = Vec::new();

    for column in columns {
        if !current.has_column(column) {
            continue;
        }
        let distinct: BTreeSet<String> = current
            .column_values(column)
            .filter_map(|value| value.label())
            .collect();
        options.push(ColumnOptions {
            column: column.to_string(),
            options: std::iter::once(ALL.to_string()).chain(distinct).collect(),
        });

        if let Some((_, selection)) = spec.categorical().iter().find(|(c, _)| c == column) {
            current = filter_equals(&current, column, selection);
        }
    }

    FilterOptions {
        columns: options,
        date_range: default_date_range(&current, spec.timestamp_column()),
    }
}
