use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crimeflow_types::{PipelineError, Result};

use crate::dataset::Dataset;
use crate::value::Value;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%Y/%m/%d %H:%M:%S",
];

/// Formats carrying a UTC offset, e.g. `2015-06-03 00:41:00+00`.
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%#z", "%Y-%m-%dT%H:%M:%S%#z"];

/// Parse the calendar date out of a date or timestamp. The local date of the timestamp is kept;
/// no time zone conversion happens.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local().date());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_local().date());
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

impl Dataset {
    /// Rewrite `column` as `YYYY-MM-DD`. Nulls and blank values become null; any other value that
    /// does not parse is a `DateParseError`.
    pub fn normalize_dates(&self, column: &str) -> Result<Dataset> {
        let values = self.column(column)?;
        let mut dates = Vec::with_capacity(values.len());
        for (row, value) in values.iter().enumerate() {
            if value.is_blank() {
                dates.push(Value::Null);
                continue;
            }
            let raw = value.to_field();
            let date = parse_date(&raw).ok_or_else(|| PipelineError::DateParseError {
                column: column.to_string(),
                value: raw.clone(),
                row,
            })?;
            dates.push(Value::Text(date.format("%Y-%m-%d").to_string()));
        }
        self.replace_column(column, &dates)
    }
}
