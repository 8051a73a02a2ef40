//! Record sources: turn an upload into raw field rows.

use certdrop_core::RawFields;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Anything that can yield the raw rows of a batch.
pub trait RecordSource {
    fn read_records(&self, bytes: &[u8]) -> Result<Vec<RawFields>, SourceError>;
}

/// Header-keyed CSV rows.
///
/// Rows may be ragged; missing trailing cells are simply absent and extra
/// cells are keyed by their column index. Fully blank rows are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvRecordSource;

impl CsvRecordSource {
    pub fn new() -> Self {
        Self
    }
}

impl RecordSource for CsvRecordSource {
    fn read_records(&self, bytes: &[u8]) -> Result<Vec<RawFields>, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let headers = reader.headers()?.clone();
        let mut rows = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.iter().all(str::is_empty) {
                continue;
            }
            let fields = row
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let key = headers
                        .get(i)
                        .map(str::to_string)
                        .unwrap_or_else(|| i.to_string());
                    (key, value.to_string())
                })
                .collect();
            rows.push(fields);
        }
        Ok(rows)
    }
}
