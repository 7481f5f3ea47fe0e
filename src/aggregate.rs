//! Summary metrics and rankings over a filtered submission table.
//!
//! The free functions are pure and operate on any [`Table`]; missing cells
//! are skipped rather than grouped. [`SurveyAggregator`] assembles them into
//! the KPI and chart panels of the dashboard.

use crate::normalize::{
    DISTRICT_OF_RESIDENCE, FIELD_OF_STUDY, INSTITUTION_NAME, INTERNSHIP_EXPOSURE_COUNT,
    SCHOLARSHIP_FREQUENCY, SUBMISSION_TIME,
};
use crate::record::Table;
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

/// Bucket width for submissions-over-time counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Daily,
    /// Weeks start on Monday
    Weekly,
    Monthly,
}

impl Granularity {
    /// First day of the bucket containing `date`.
    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "week" => Ok(Granularity::Weekly),
            "monthly" | "month" => Ok(Granularity::Monthly),
            other => Err(format!(
                "unknown granularity '{}' (expected daily, weekly or monthly)",
                other
            )),
        }
    }
}

/// One entry of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankEntry {
    pub label: String,
    pub value: f64,
}

/// Descending (label, value) pairs; ties keep first-encountered order.
pub type Ranking = Vec<RankEntry>;

/// Count of submissions in one time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub start: NaiveDate,
    pub count: usize,
}

/// Count of rows sharing a pair of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossTabCell {
    pub row: String,
    pub column: String,
    pub count: usize,
}

pub fn row_count(table: &Table) -> usize {
    table.len()
}

/// Number of distinct non-missing values in `column`; 0 if the column is absent.
pub fn distinct_count(table: &Table, column: &str) -> usize {
    table
        .column_values(column)
        .filter_map(|value| value.label())
        .collect::<HashSet<_>>()
        .len()
}

pub fn numeric_sum(table: &Table, column: &str) -> f64 {
    table.column_values(column).filter_map(|v| v.as_number()).sum()
}

/// Mean of the non-missing numbers in `column`, `None` when there are none.
pub fn numeric_mean(table: &Table, column: &str) -> Option<f64> {
    let (sum, n) = table
        .column_values(column)
        .filter_map(|v| v.as_number())
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Accumulates per-label totals in first-encountered order.
fn grouped_totals<I>(items: I) -> Vec<(String, f64)>
where
    I: Iterator<Item = (String, f64)>,
{
    let mut order: Vec<(String, f64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (label, amount) in items {
        match index.get(&label) {
            Some(&i) => order[i].1 += amount,
            None => {
                index.insert(label.clone(), order.len());
                order.push((label, amount));
            }
        }
    }
    order
}

fn rank(groups: Vec<(String, f64)>, n: usize) -> Ranking {
    let mut groups = groups;
    // stable: equal values keep encounter order
    groups.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    groups
        .into_iter()
        .take(n)
        .map(|(label, value)| RankEntry { label, value })
        .collect()
}

/// Top `n` values of `column` by number of occurrences.
pub fn top_n_by_frequency(table: &Table, column: &str, n: usize) -> Ranking {
    let groups = grouped_totals(
        table
            .column_values(column)
            .filter_map(|value| value.label())
            .map(|label| (label, 1.0)),
    );
    rank(groups, n)
}

/// Top `n` groups of `group_column` by the sum of `value_column`.
///
/// Groups whose values are all missing still appear with a total of 0.
pub fn top_n_by_sum(table: &Table, group_column: &str, value_column: &str, n: usize) -> Ranking {
    let groups = grouped_totals(table.rows().iter().filter_map(|record| {
        let label = crate::record::cell(record, group_column).label()?;
        let amount = crate::record::cell(record, value_column)
            .as_number()
            .unwrap_or(0.0);
        Some((label, amount))
    }));
    rank(groups, n)
}

/// Counts rows per time bucket of `column`, ascending by bucket start.
pub fn time_buckets(table: &Table, column: &str, granularity: Granularity) -> Vec<TimeBucket> {
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for ts in table.column_values(column).filter_map(|v| v.as_timestamp()) {
        *counts.entry(granularity.bucket_start(ts.date())).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(start, count)| TimeBucket { start, count })
        .collect()
}

/// Counts rows per (`row_column`, `column_column`) pair, sorted by the pair.
pub fn cross_tab(table: &Table, row_column: &str, column_column: &str) -> Vec<CrossTabCell> {
    let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    for record in table.rows() {
        let row = crate::record::cell(record, row_column).label();
        let column = crate::record::cell(record, column_column).label();
        if let (Some(row), Some(column)) = (row, column) {
            *counts.entry((row, column)).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .map(|((row, column), count)| CrossTabCell { row, column, count })
        .collect()
}

/// Ranking sizes and time bucketing for a dashboard run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateSettings {
    /// Entries in KPI detail panels (default: 3)
    pub detail_top_n: usize,
    /// Entries in top-N chart panels (default: 5)
    pub chart_top_n: usize,
    pub granularity: Granularity,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        AggregateSettings {
            detail_top_n: 3,
            chart_top_n: 5,
            granularity: Granularity::Daily,
        }
    }
}

/// Headline metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub total_submissions: usize,
    pub unique_institutions: usize,
    /// Mean internship exposure over rows with a value
    pub avg_internships: Option<f64>,
    pub unique_districts: usize,
}

/// Short rankings shown alongside each KPI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiDetails {
    pub top_institutions: Ranking,
    pub top_fields: Ranking,
    pub top_fields_by_internships: Ranking,
    pub top_districts: Ranking,
}

/// Data behind each chart panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Charts {
    pub top_institutions: Ranking,
    pub top_fields: Ranking,
    pub scholarship_distribution: Ranking,
    pub submissions_over_time: Vec<TimeBucket>,
    pub granularity: Granularity,
    /// Every field, ordered by submission count descending rather than by name
    pub students_per_field: Ranking,
    /// Every field, ordered by internship total descending rather than by name
    pub internships_per_field: Ranking,
    pub scholarship_by_field: Vec<CrossTabCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub kpis: Kpis,
    pub details: KpiDetails,
    pub charts: Charts,
}

/// Computes dashboard aggregates over a non-empty table.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, table: &Table, settings: &AggregateSettings) -> AggregateResult;
}

/// Aggregator for the internship and scholarship survey.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurveyAggregator;

impl Aggregator for SurveyAggregator {
    fn aggregate(&self, table: &Table, settings: &AggregateSettings) -> AggregateResult {
        let detail = settings.detail_top_n;
        let chart = settings.chart_top_n;

        let kpis = Kpis {
            total_submissions: row_count(table),
            unique_institutions: distinct_count(table, INSTITUTION_NAME),
            avg_internships: numeric_mean(table, INTERNSHIP_EXPOSURE_COUNT),
            unique_districts: distinct_count(table, DISTRICT_OF_RESIDENCE),
        };

        let details = KpiDetails {
            top_institutions: top_n_by_frequency(table, INSTITUTION_NAME, detail),
            top_fields: top_n_by_frequency(table, FIELD_OF_STUDY, detail),
            top_fields_by_internships: top_n_by_sum(
                table,
                FIELD_OF_STUDY,
                INTERNSHIP_EXPOSURE_COUNT,
                detail,
            ),
            top_districts: top_n_by_frequency(table, DISTRICT_OF_RESIDENCE, detail),
        };

        let charts = Charts {
            top_institutions: top_n_by_frequency(table, INSTITUTION_NAME, chart),
            top_fields: top_n_by_frequency(table, FIELD_OF_STUDY, chart),
            scholarship_distribution: top_n_by_frequency(table, SCHOLARSHIP_FREQUENCY, usize::MAX),
            submissions_over_time: time_buckets(table, SUBMISSION_TIME, settings.granularity),
            granularity: settings.granularity,
            students_per_field: top_n_by_frequency(table, FIELD_OF_STUDY, usize::MAX),
            internships_per_field: top_n_by_sum(
                table,
                FIELD_OF_STUDY,
                INTERNSHIP_EXPOSURE_COUNT,
                usize::MAX,
            ),
            scholarship_by_field: cross_tab(table, FIELD_OF_STUDY, SCHOLARSHIP_FREQUENCY),
        };

        AggregateResult {
            kpis,
            details,
            charts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, Value};
    use chrono::NaiveDateTime;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn labels(ranking: &Ranking) -> Vec<&str> {
        ranking.iter().map(|e| e.label.as_str()).collect()
    }

    #[test]
    fn frequency_ties_keep_encounter_order() {
        let mut rows = Vec::new();
        for label in ["Z", "X", "Y", "X", "Y", "X", "Y", "Z", "X", "Y", "X", "Y", "Z"] {
            rows.push(record(&[("c", text(label))]));
        }
        let table = Table::from_records(rows);

        let top = top_n_by_frequency(&table, "c", 2);
        assert_eq!(labels(&top), vec!["X", "Y"]);
        assert_eq!(top[0].value, 5.0);
        assert_eq!(top[1].value, 5.0);
    }

    #[test]
    fn frequency_skips_missing_and_absent_columns() {
        let table = Table::from_records(vec![
            record(&[("c", text("A"))]),
            record(&[("c", Value::Missing)]),
        ]);
        assert_eq!(labels(&top_n_by_frequency(&table, "c", 5)), vec!["A"]);
        assert!(top_n_by_frequency(&table, "nope", 5).is_empty());
        assert_eq!(distinct_count(&table, "c"), 1);
        assert_eq!(distinct_count(&table, "nope"), 0);
    }

    #[test]
    fn sum_ranking_orders_by_total() {
        let table = Table::from_records(vec![
            record(&[("f", text("Law")), ("n", Value::Number(1.0))]),
            record(&[("f", text("Art")), ("n", Value::Number(4.0))]),
            record(&[("f", text("Law")), ("n", Value::Number(2.0))]),
            record(&[("f", text("Bio")), ("n", Value::Missing)]),
        ]);
        let top = top_n_by_sum(&table, "f", "n", 3);
        assert_eq!(labels(&top), vec!["Art", "Law", "Bio"]);
        assert_eq!(top[1].value, 3.0);
        assert_eq!(top[2].value, 0.0);
    }

    #[test]
    fn mean_ignores_missing_values() {
        let table = Table::from_records(vec![
            record(&[("n", Value::Number(1.0))]),
            record(&[("n", Value::Missing)]),
            record(&[("n", Value::Number(4.0))]),
        ]);
        assert_eq!(numeric_mean(&table, "n"), Some(2.5));
        assert_eq!(numeric_sum(&table, "n"), 5.0);
        assert_eq!(numeric_mean(&table, "other"), None);
    }

    #[test]
    fn time_buckets_by_granularity() {
        let at = |s: &str| {
            Value::Timestamp(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
        };
        let table = Table::from_records(vec![
            record(&[("t", at("2024-02-07 10:00:00"))]),
            record(&[("t", at("2024-01-31 10:00:00"))]),
            record(&[("t", at("2024-02-05 09:00:00"))]),
            record(&[("t", Value::Missing)]),
        ]);
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();

        let daily = time_buckets(&table, "t", Granularity::Daily);
        assert_eq!(daily.len(), 3);
        assert_eq!(daily[0].start, d(2024, 1, 31));

        let weekly = time_buckets(&table, "t", Granularity::Weekly);
        assert_eq!(
            weekly,
            vec![
                TimeBucket { start: d(2024, 1, 29), count: 1 },
                TimeBucket { start: d(2024, 2, 5), count: 2 },
            ]
        );

        let monthly = time_buckets(&table, "t", Granularity::Monthly);
        assert_eq!(
            monthly,
            vec![
                TimeBucket { start: d(2024, 1, 1), count: 1 },
                TimeBucket { start: d(2024, 2, 1), count: 2 },
            ]
        );
    }

    #[test]
    fn cross_tab_counts_pairs() {
        let table = Table::from_records(vec![
            record(&[("f", text("Law")), ("s", text("Never"))]),
            record(&[("f", text("Art")), ("s", text("Once"))]),
            record(&[("f", text("Law")), ("s", text("Never"))]),
            record(&[("f", text("Law")), ("s", Value::Missing)]),
        ]);
        let cells = cross_tab(&table, "f", "s");
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0], CrossTabCell { row: "Art".into(), column: "Once".into(), count: 1 });
        assert_eq!(cells[1].count, 2);
    }

    #[test]
    fn granularity_parses() {
        assert_eq!("Weekly".parse::<Granularity>(), Ok(Granularity::Weekly));
        assert_eq!("monthly".parse::<Granularity>(), Ok(Granularity::Monthly));
        assert!("hourly".parse::<Granularity>().is_err());
    }

    #[test]
    fn survey_aggregator_fills_panels() {
        let table = Table::from_records(vec![
            record(&[
                (INSTITUTION_NAME, text("Acme")),
                (FIELD_OF_STUDY, text("Law")),
                (INTERNSHIP_EXPOSURE_COUNT, Value::Number(2.0)),
                (DISTRICT_OF_RESIDENCE, text("Gulu")),
            ]),
            record(&[
                (INSTITUTION_NAME, text("Beta")),
                (FIELD_OF_STUDY, text("Law")),
                (INTERNSHIP_EXPOSURE_COUNT, Value::Number(4.0)),
                (DISTRICT_OF_RESIDENCE, text("Gulu")),
            ]),
        ]);
        let result = SurveyAggregator.aggregate(&table, &AggregateSettings::default());

        assert_eq!(result.kpis.total_submissions, 2);
        assert_eq!(result.kpis.unique_institutions, 2);
        assert_eq!(result.kpis.avg_internships, Some(3.0));
        assert_eq!(result.kpis.unique_districts, 1);
        assert_eq!(labels(&result.details.top_fields_by_internships), vec!["Law"]);
        assert!(result.charts.scholarship_distribution.is_empty());
        assert!(result.charts.submissions_over_time.is_empty());
    }

    #[test]
    fn per_field_panels_rank_by_value_not_name() {
        let table = Table::from_records(vec![
            record(&[(FIELD_OF_STUDY, text("Art")), (INTERNSHIP_EXPOSURE_COUNT, Value::Number(1.0))]),
            record(&[(FIELD_OF_STUDY, text("Law")), (INTERNSHIP_EXPOSURE_COUNT, Value::Number(5.0))]),
            record(&[(FIELD_OF_STUDY, text("Law")), (INTERNSHIP_EXPOSURE_COUNT, Value::Missing)]),
            record(&[(FIELD_OF_STUDY, text("Zoology")), (INTERNSHIP_EXPOSURE_COUNT, Value::Number(2.0))]),
        ]);
        let charts = SurveyAggregator
            .aggregate(&table, &AggregateSettings::default())
            .charts;

        assert_eq!(labels(&charts.students_per_field), vec!["Law", "Art", "Zoology"]);
        assert_eq!(labels(&charts.internships_per_field), vec!["Law", "Zoology", "Art"]);
    }
}
