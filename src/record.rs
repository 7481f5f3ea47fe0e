//! Tabular representation of survey submissions.
//!
//! Submissions arrive as arbitrarily nested JSON documents. They are
//! flattened into [`Record`]s keyed by dotted-path column names and
//! collected into a [`Table`] that tracks which columns were seen.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent or uncoercible value
    Missing,
    /// Free-form text
    Text(String),
    /// Numeric value
    Number(f64),
    /// Absolute point in time (naive, as submitted)
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Returns true when the cell carries no value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Returns the numeric payload, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the timestamp payload, if any.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Label used when grouping or comparing against a filter selection.
    ///
    /// Returns `None` for missing cells so they never form a group.
    pub fn label(&self) -> Option<String> {
        if self.is_missing() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => Ok(()),
            Value::Text(s) => write!(f, "{}", s),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

/// One submission: column name to cell value.
pub type Record = HashMap<String, Value>;

static MISSING: Value = Value::Missing;

/// Ordered rows sharing a superset of column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Record>,
}

impl Table {
    /// Creates an empty table with no columns.
    pub fn new() -> Self {
        Table::default()
    }

    /// Creates an empty table with a fixed column order.
    pub fn with_columns(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from records, keeping the order in which columns are first seen.
    ///
    /// Columns within a single record are visited in sorted order because
    /// records do not preserve key order.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut table = Table::new();
        for record in records {
            table.push(record);
        }
        table
    }

    /// Appends a row, registering any columns it introduces.
    pub fn push(&mut self, record: Record) {
        let known: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        let mut new_columns: Vec<String> = record
            .keys()
            .filter(|key| !known.contains(key.as_str()))
            .cloned()
            .collect();
        new_columns.sort();
        self.columns.extend(new_columns);
        self.rows.push(record);
    }

    /// Column names in table order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns true if the column exists in the table.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Rows in fetch order.
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the cell at `row`/`column`, reading absent cells as missing.
    pub fn value(&self, row: usize, column: &str) -> &Value {
        self.rows
            .get(row)
            .and_then(|record| record.get(column))
            .unwrap_or(&MISSING)
    }

    /// Iterates over a column's cells in row order.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows
            .iter()
            .map(move |record| record.get(column).unwrap_or(&MISSING))
    }

    /// Keeps only the rows matching the predicate, preserving order and columns.
    pub fn retain_rows<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&Record) -> bool,
    {
        self.rows.retain(|record| predicate(record));
    }

    /// Returns a copy of this table restricted to the matching rows.
    pub fn filtered<F>(&self, predicate: F) -> Table
    where
        F: FnMut(&Record) -> bool,
    {
        let mut table = self.clone();
        table.retain_rows(predicate);
        table
    }

    pub(crate) fn from_parts(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Table { columns, rows }
    }
}

/// Reads a cell from a record, treating absent keys as missing.
pub fn cell<'a>(record: &'a Record, column: &str) -> &'a Value {
    record.get(column).unwrap_or(&MISSING)
}

/// Flattens a JSON object into a record with dotted-path columns.
///
/// Nested objects are expanded recursively (`{"a": {"b": 1}}` becomes
/// column `a.b`). Arrays are kept as their JSON text, `null` becomes
/// [`Value::Missing`].
pub fn flatten_object(object: &serde_json::Map<String, serde_json::Value>) -> Record {
    let mut record = Record::new();
    flatten_into(&mut record, None, object);
    record
}

fn flatten_into(
    record: &mut Record,
    prefix: Option<&str>,
    object: &serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in object {
        let column = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };
        match value {
            serde_json::Value::Object(nested) if !nested.is_empty() => {
                flatten_into(record, Some(&column), nested);
            }
            other => {
                record.insert(column, json_to_value(other));
            }
        }
    }
}

fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Missing,
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Value::Number)
            .unwrap_or_else(|| Value::Text(n.to_string())),
        serde_json::Value::Bool(b) => Value::Text(b.to_string()),
        other => Value::Text(other.to_string()),
    }
}
