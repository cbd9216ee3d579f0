//! CSV reading and writing.
//!
//! Sources arrive in their declared text encoding; artifacts are always written back as UTF-8
//! with a header row.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crimeflow_types::{PipelineError, Result};

use crate::dataset::Dataset;
use crate::value::Value;

/// Text encoding of a source payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1: every byte is the code point of the same value, so decoding never fails.
    Latin1,
}

/// Decode a raw payload to text. A leading UTF-8 byte-order mark is dropped.
pub fn decode(bytes: &[u8], encoding: Encoding, source: &str) -> Result<String> {
    let text = match encoding {
        Encoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| {
            PipelineError::SourceFormatError {
                source_ref: source.to_string(),
                message: format!("invalid UTF-8 at byte {}", e.utf8_error().valid_up_to()),
            }
        })?,
        Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
    };
    Ok(match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    })
}

fn format_error(source: &str, err: csv::Error) -> PipelineError {
    PipelineError::SourceFormatError {
        source_ref: source.to_string(),
        message: err.to_string(),
    }
}

fn collect_rows<S: Into<String>>(
    reader: &mut csv::Reader<&[u8]>,
    columns: impl IntoIterator<Item = S>,
    source: &str,
) -> Result<Dataset> {
    let rows = reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(Value::from_field).collect())
                .map_err(|e| format_error(source, e))
        })
        .collect::<Result<Vec<Vec<Value>>>>()?;
    Dataset::from_rows(columns, rows).map_err(|e| PipelineError::SourceFormatError {
        source_ref: source.to_string(),
        message: e.to_string(),
    })
}

/// Parse a CSV payload whose first record is the header.
pub fn read_csv(bytes: &[u8], encoding: Encoding, source: &str) -> Result<Dataset> {
    let text = decode(bytes, encoding, source)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());
    let header = reader.headers().map_err(|e| format_error(source, e))?.clone();
    if header.is_empty() || header.iter().all(str::is_empty) {
        return Err(PipelineError::SourceFormatError {
            source_ref: source.to_string(),
            message: "missing header row".into(),
        });
    }
    collect_rows(&mut reader, header.iter(), source)
}

/// Parse a CSV payload without a header row, naming its columns positionally.
pub fn read_csv_headerless(
    bytes: &[u8],
    encoding: Encoding,
    source: &str,
    columns: &[&str],
) -> Result<Dataset> {
    let text = decode(bytes, encoding, source)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(text.as_bytes());
    collect_rows(&mut reader, columns.iter().copied(), source)
}

/// Read a UTF-8 CSV artifact from disk.
pub fn read_csv_file(path: &Path) -> Result<Dataset> {
    let bytes = std::fs::read(path)?;
    read_csv(&bytes, Encoding::Utf8, &path.display().to_string())
}

/// Serialize a dataset as UTF-8 CSV with a header row.
pub fn to_csv_bytes(dataset: &Dataset) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let io_err = |e: csv::Error| PipelineError::Other(format!("CSV write failed: {e}"));
    writer.write_record(dataset.columns()).map_err(io_err)?;
    for row in &dataset.rows() {
        writer
            .write_record(row.iter().map(Value::to_field))
            .map_err(io_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Other(format!("CSV write failed: {e}")))
}

/// Write a dataset to `path`, creating parent directories as needed.
pub fn write_csv_file(dataset: &Dataset, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = to_csv_bytes(dataset)?;
    std::fs::write(path, bytes)?;
    tracing::debug!(path = %path.display(), rows = dataset.len(), "CSV written");
    Ok(())
}
