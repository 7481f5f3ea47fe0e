//! CSV export of filtered tables.

use crate::record::{Record, Table, Value};

/// File name offered for CSV downloads.
pub const DEFAULT_EXPORT_FILE_NAME: &str = "filtered_kobo_data.csv";

/// Errors that can occur when writing or reading CSV.
#[derive(Debug)]
pub enum ExportError {
    Csv(csv::Error),
    Encoding(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Csv(err) => write!(f, "CSV error: {}", err),
            ExportError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv(err)
    }
}

/// Writes `table` as CSV with a header row in table column order.
///
/// Missing cells are written as empty fields.
pub fn to_csv(table: &Table) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for record in table.rows() {
        writer.write_record(
            table
                .columns()
                .iter()
                .map(|column| crate::record::cell(record, column).to_string()),
        )?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Encoding(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Encoding(e.to_string()))
}

/// Reads CSV produced by [`to_csv`] back into a table of text cells.
///
/// Empty fields become [`Value::Missing`].
pub fn from_csv(text: &str) -> Result<Table, ExportError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut table = Table::with_columns(columns.clone());
    for row in reader.records() {
        let row = row?;
        let record: Record = columns
            .iter()
            .zip(row.iter())
            .map(|(column, field)| {
                let value = if field.is_empty() {
                    Value::Missing
                } else {
                    Value::Text(field.to_string())
                };
                (column.clone(), value)
            })
            .collect();
        table.push(record);
    }
    Ok(table)
}
