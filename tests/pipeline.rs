use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use survey_dashboard::aggregate::SurveyAggregator;
use survey_dashboard::normalize::{FIELD_OF_STUDY, INSTITUTION_NAME, SUBMISSION_TIME};
use survey_dashboard::{
    from_csv, to_csv, AggregateSettings, DashboardState, DateRange, Fetcher, FetcherConfig,
    FilterSpec, InMemoryPageSource, ManualClock, Normalizer, Pipeline, PipelineSettings,
    ResultCache, Value,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn survey_pages() -> InMemoryPageSource {
    let mut source = InMemoryPageSource::new();
    source.add_page(
        "https://forms.test/data?page=1",
        json!({
            "results": [
                {"_submission_time": "2024-03-01T08:00:00", "institution_name": " acme u ",
                 "field_of_study": "law", "internship_exposure_count": "2",
                 "scholarship_frequency": "Never", "district_of_residence": "gulu",
                 "_geolocation": {"lat": 2.7, "lon": 32.3}},
                {"_submission_time": "2024-03-01T17:30:00", "institution_name": "beta college",
                 "field_of_study": "Art", "internship_exposure_count": "abc",
                 "scholarship_frequency": "Once", "district_of_residence": "Gulu"}
            ],
            "next": "https://forms.test/data?page=2"
        }),
    );
    source.add_page(
        "https://forms.test/data?page=2",
        json!({
            "results": [
                {"_submission_time": "2024-03-04T23:59:59", "institution_name": "ACME U",
                 "field_of_study": "Law", "internship_exposure_count": 4,
                 "scholarship_frequency": "Never", "district_of_residence": "Lira"}
            ],
            "next": null
        }),
    );
    source
}

fn pipeline(source: InMemoryPageSource) -> Pipeline {
    Pipeline::new(
        Fetcher::new(Box::new(source), FetcherConfig::default()),
        Normalizer::survey_default(),
        Box::new(SurveyAggregator),
        PipelineSettings {
            endpoint: "https://forms.test/data?page=1".to_string(),
            cache_ttl: Duration::from_secs(60),
            aggregate: AggregateSettings::default(),
        },
    )
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn fetches_normalizes_and_aggregates_across_pages() {
    init_logging();
    let pipeline = pipeline(survey_pages());
    let cache = ResultCache::new();

    let normalized = pipeline.load(&cache).await.unwrap();
    assert_eq!(normalized.len(), 3);
    assert!(!normalized.has_column("_geolocation.lat"));
    assert_eq!(normalized.value(0, INSTITUTION_NAME), &Value::Text("Acme U".into()));
    assert_eq!(normalized.value(1, INSTITUTION_NAME), &Value::Text("Beta College".into()));
    assert_eq!(normalized.value(1, "internship_exposure_count"), &Value::Missing);

    let state = pipeline.run(&cache, &FilterSpec::new()).await;
    let view = match state {
        DashboardState::Ready(view) => view,
        other => panic!("unexpected state: {:?}", other),
    };
    let kpis = &view.aggregates.kpis;
    assert_eq!(kpis.total_submissions, 3);
    assert_eq!(kpis.unique_institutions, 2);
    assert_eq!(kpis.unique_districts, 2);
    assert_eq!(kpis.avg_internships, Some(3.0));

    let top = &view.aggregates.charts.top_institutions;
    assert_eq!(top[0].label, "Acme U");
    assert_eq!(top[0].value, 2.0);
    assert_eq!(view.aggregates.details.top_fields_by_internships[0].label, "Law");
    assert_eq!(view.aggregates.charts.submissions_over_time.len(), 2);
}

#[tokio::test]
async fn end_date_keeps_last_second_of_day() {
    let pipeline = pipeline(survey_pages());
    let cache = ResultCache::new();
    let spec = FilterSpec::new()
        .with_equals(FIELD_OF_STUDY, "Law")
        .with_date_range(DateRange::new(date(2024, 3, 2), date(2024, 3, 4)));

    match pipeline.run(&cache, &spec).await {
        DashboardState::Ready(view) => {
            assert_eq!(view.table.len(), 1);
            assert_eq!(
                view.table.value(0, SUBMISSION_TIME).to_string(),
                "2024-03-04 23:59:59"
            );
        }
        other => panic!("unexpected state: {:?}", other),
    }
}

#[tokio::test]
async fn cache_expires_with_injected_clock() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap(),
    ));
    let cache = ResultCache::with_clock(Arc::clone(&clock));
    let pipeline = pipeline(survey_pages());

    pipeline.load(&cache).await.unwrap();
    let first = cache.fetched_at(&pipeline.settings().endpoint).await.unwrap();

    clock.advance(Duration::from_secs(30));
    pipeline.load(&cache).await.unwrap();
    assert_eq!(cache.fetched_at(&pipeline.settings().endpoint).await, Some(first));

    clock.advance(Duration::from_secs(31));
    pipeline.load(&cache).await.unwrap();
    let second = cache.fetched_at(&pipeline.settings().endpoint).await.unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn failing_page_blocks_the_cycle() {
    let mut source = survey_pages();
    source.add_status("https://forms.test/data?page=2", 502);
    let pipeline = pipeline(source);
    let cache = ResultCache::new();

    match pipeline.run(&cache, &FilterSpec::new()).await {
        DashboardState::Failed { error, .. } => assert!(error.is_network()),
        other => panic!("unexpected state: {:?}", other),
    }
}

#[tokio::test]
async fn filtered_export_round_trips_through_csv() {
    let pipeline = pipeline(survey_pages());
    let cache = ResultCache::new();
    let spec = FilterSpec::new().with_equals(INSTITUTION_NAME, "Acme U");

    let view = match pipeline.run(&cache, &spec).await {
        DashboardState::Ready(view) => view,
        other => panic!("unexpected state: {:?}", other),
    };
    let csv = to_csv(&view.table).unwrap();
    let reread = from_csv(&csv).unwrap();

    assert_eq!(reread.columns(), view.table.columns());
    assert_eq!(reread.len(), 2);
    assert_eq!(
        Normalizer::survey_default().normalize(&reread).table(),
        &view.table
    );
}
