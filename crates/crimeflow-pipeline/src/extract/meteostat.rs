use std::io::Read;

use async_trait::async_trait;
use chrono::NaiveDate;
use flate2::read::GzDecoder;

use crimeflow_frame::{parse_date, read_csv_headerless, Dataset, Encoding};
use crimeflow_types::{PipelineError, Result};

use super::{fetch_bytes, Extractor};
use crate::config::DEFAULT_METEOSTAT_URL;

/// Column layout of a Meteostat bulk daily file, which has no header row.
const BULK_DAILY_LAYOUT: [&str; 11] = [
    "time", "tavg", "tmin", "tmax", "prcp", "snow", "wdir", "wspd", "wpgt", "pres", "tsun",
];

/// Columns kept in the `weather_raw` artifact.
pub const WEATHER_COLUMNS: [&str; 8] = ["time", "tavg", "tmin", "tmax", "prcp", "wdir", "wspd", "pres"];

/// Daily observations of one weather station over an inclusive date range.
#[derive(Debug, Clone)]
pub struct MeteostatExtractor {
    client: reqwest::Client,
    station: String,
    start: NaiveDate,
    end: NaiveDate,
    base_url: String,
}

impl MeteostatExtractor {
    pub fn new(client: reqwest::Client, station: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            client,
            station: station.into(),
            start,
            end,
            base_url: DEFAULT_METEOSTAT_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/daily/{}.csv.gz",
            self.base_url.trim_end_matches('/'),
            self.station
        )
    }

    /// Keep rows dated within `[start, end]` and the weather columns.
    fn shape(&self, bulk: Dataset, source: &str) -> Result<Dataset> {
        let (start, end) = (self.start, self.end);
        let mut bad: Option<(usize, String)> = None;
        let mut row_no = 0usize;
        let in_range = bulk.filter_by("time", |value| {
            row_no += 1;
            let raw = value.to_field();
            match parse_date(&raw) {
                Some(d) => d >= start && d <= end,
                None => {
                    bad.get_or_insert((row_no - 1, raw));
                    false
                }
            }
        })?;
        if let Some((row, value)) = bad {
            return Err(PipelineError::SourceFormatError {
                source_ref: source.to_string(),
                message: format!("unparseable date '{value}' at row {row}"),
            });
        }
        in_range.project(&WEATHER_COLUMNS)
    }
}

fn gunzip(bytes: &[u8], source: &str) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::SourceFormatError {
            source_ref: source.to_string(),
            message: format!("gzip: {e}"),
        })?;
    Ok(out)
}

#[async_trait]
impl Extractor for MeteostatExtractor {
    fn source_ref(&self) -> String {
        self.url()
    }

    async fn extract(&self) -> Result<Dataset> {
        let source = self.source_ref();
        let compressed = fetch_bytes(self.client.get(&source), &source).await?;
        let csv = gunzip(&compressed, &source)?;
        let bulk = read_csv_headerless(&csv, Encoding::Utf8, &source, &BULK_DAILY_LAYOUT)?;
        let total = bulk.len();
        let weather = self.shape(bulk, &source)?;
        tracing::info!(
            station = %self.station,
            start = %self.start,
            end = %self.end,
            days = weather.len(),
            total,
            "Weather observations selected"
        );
        Ok(weather)
    }
}
