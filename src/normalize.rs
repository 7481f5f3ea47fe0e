//! Column selection and cell coercion for survey submissions.
//!
//! Normalization never fails: each cell is coerced through a
//! `Result<Value, CoercionError>` and failures become [`Value::Missing`].

use crate::record::{Record, Table, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub const SUBMISSION_TIME: &str = "_submission_time";
pub const INSTITUTION_NAME: &str = "institution_name";
pub const FIELD_OF_STUDY: &str = "field_of_study";
pub const EDUCATION_LEVEL: &str = "education_level";
pub const SCHOLARSHIP_FREQUENCY: &str = "scholarship_frequency";
pub const INTERNSHIP_EXPOSURE_COUNT: &str = "internship_exposure_count";
pub const DISTRICT_OF_RESIDENCE: &str = "district_of_residence";

/// Survey columns in display order.
pub const SURVEY_COLUMNS: [&str; 7] = [
    SUBMISSION_TIME,
    INSTITUTION_NAME,
    FIELD_OF_STUDY,
    EDUCATION_LEVEL,
    SCHOLARSHIP_FREQUENCY,
    INTERNSHIP_EXPOSURE_COUNT,
    DISTRICT_OF_RESIDENCE,
];

/// How a column's cells are coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Timestamp,
    Numeric,
    Text,
    /// Kept exactly as fetched
    Passthrough,
}

impl ColumnKind {
    /// Kind used for a survey column name; unknown columns pass through.
    pub fn for_survey_column(name: &str) -> Self {
        match name {
            SUBMISSION_TIME => ColumnKind::Timestamp,
            INTERNSHIP_EXPOSURE_COUNT => ColumnKind::Numeric,
            INSTITUTION_NAME | FIELD_OF_STUDY | EDUCATION_LEVEL | DISTRICT_OF_RESIDENCE => {
                ColumnKind::Text
            }
            _ => ColumnKind::Passthrough,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        ColumnSpec {
            name: name.into(),
            kind,
        }
    }
}

/// Why a cell could not be coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoercionError {
    /// Cell was already missing
    Missing,
    /// Text could not be parsed as the target type
    Unparsable { expected: &'static str, raw: String },
}

impl std::fmt::Display for CoercionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoercionError::Missing => write!(f, "value is missing"),
            CoercionError::Unparsable { expected, raw } => {
                write!(f, "cannot parse '{}' as {}", raw, expected)
            }
        }
    }
}

impl std::error::Error for CoercionError {}

/// A table restricted to the allowed columns with coerced cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTable(Table);

impl NormalizedTable {
    pub fn table(&self) -> &Table {
        &self.0
    }

    pub fn into_table(self) -> Table {
        self.0
    }
}

impl std::ops::Deref for NormalizedTable {
    type Target = Table;

    fn deref(&self) -> &Table {
        &self.0
    }
}

/// Selects and coerces the allowed columns.
#[derive(Debug, Clone)]
pub struct Normalizer {
    columns: Vec<ColumnSpec>,
}

impl Normalizer {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Normalizer { columns }
    }

    /// The seven survey columns with their default kinds.
    pub fn survey_default() -> Self {
        Self::for_columns(SURVEY_COLUMNS)
    }

    /// Builds a normalizer for an allow-list of column names.
    pub fn for_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                ColumnSpec::new(name, ColumnKind::for_survey_column(name))
            })
            .collect();
        Normalizer { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Keeps the allowed columns present in `table` and coerces their cells.
    ///
    /// Allowed columns absent from the input are omitted, never synthesized.
    pub fn normalize(&self, table: &Table) -> NormalizedTable {
        let present: Vec<&ColumnSpec> = self
            .columns
            .iter()
            .filter(|spec| table.has_column(&spec.name))
            .collect();

        let rows = table
            .rows()
            .iter()
            .map(|record| {
                present
                    .iter()
                    .map(|spec| {
                        let raw = record.get(&spec.name).unwrap_or(&Value::Missing);
                        (spec.name.clone(), normalize_cell(spec.kind, raw))
                    })
                    .collect::<Record>()
            })
            .collect();

        let columns = present.iter().map(|spec| spec.name.clone()).collect();
        NormalizedTable(Table::from_parts(columns, rows))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::survey_default()
    }
}

/// Applies the missing-on-failure policy to one cell.
pub fn normalize_cell(kind: ColumnKind, raw: &Value) -> Value {
    let coerced = match kind {
        ColumnKind::Timestamp => coerce_timestamp(raw),
        ColumnKind::Numeric => coerce_number(raw),
        ColumnKind::Text => coerce_text(raw),
        ColumnKind::Passthrough => return raw.clone(),
    };
    coerced.unwrap_or(Value::Missing)
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses a timestamp cell.
///
/// Offsets in RFC 3339 input are converted to UTC and dropped.
pub fn coerce_timestamp(raw: &Value) -> Result<Value, CoercionError> {
    let text = match raw {
        Value::Timestamp(ts) => return Ok(Value::Timestamp(*ts)),
        Value::Missing => return Err(CoercionError::Missing),
        other => other.to_string(),
    };
    let text = text.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(Value::Timestamp(ts.with_timezone(&Utc).naive_utc()));
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Value::Timestamp(ts));
        }
    }
    if let Some(ts) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Value::Timestamp(ts));
    }

    Err(CoercionError::Unparsable {
        expected: "timestamp",
        raw: text.to_string(),
    })
}

/// Parses a numeric cell.
pub fn coerce_number(raw: &Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::Missing => Err(CoercionError::Missing),
        other => {
            let text = other.to_string();
            text.trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Value::Number)
                .ok_or(CoercionError::Unparsable {
                    expected: "number",
                    raw: text,
                })
        }
    }
}

/// Converts a cell to trimmed, title-cased text.
pub fn coerce_text(raw: &Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Missing => Err(CoercionError::Missing),
        other => Ok(Value::Text(title_case(other.to_string().trim()))),
    }
}

/// Upper-cases each letter that follows a non-letter and lower-cases the rest.
///
/// `"o'neil COLLEGE"` becomes `"O'Neil College"`. A word-initial letter whose
/// upper-case form is several characters keeps only the first upper-cased
/// (`"ßtraße"` becomes `"Sstraße"`), so the result is stable under reapplication.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_is_letter = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if previous_is_letter {
                out.extend(ch.to_lowercase());
            } else {
                let mut upper = ch.to_uppercase();
                if let Some(first) = upper.next() {
                    out.push(first);
                }
                out.extend(upper.flat_map(char::to_lowercase));
            }
            previous_is_letter = true;
        } else {
            out.push(ch);
            previous_is_letter = false;
        }
    }
    out
}
