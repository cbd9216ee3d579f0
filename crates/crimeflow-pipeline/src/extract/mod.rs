//! Extractors: one per kind of data source. Each produces a raw [`Dataset`]; [`ExtractTask`]
//! persists it as the source's artifact.

mod file;
mod http;
mod kaggle;
mod meteostat;

use async_trait::async_trait;

use crimeflow_frame::Dataset;
use crimeflow_types::{PipelineError, Result};

use crate::config::SourceConfig;
use crate::task::{Resource, Task, TaskContext};

pub use file::FileExtractor;
pub use http::HttpCsvExtractor;
pub use kaggle::{KaggleCredentials, KaggleExtractor};
pub use meteostat::{MeteostatExtractor, WEATHER_COLUMNS};

// ---------------------------------------------------------------------------
// Extractor trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Extractor: Send + Sync {
    /// URL, dataset name or path, used in errors and logs.
    fn source_ref(&self) -> String;

    /// Fetch and parse the source. Transport failures are `SourceUnavailable`, unparseable payloads
    /// `SourceFormatError`.
    async fn extract(&self) -> Result<Dataset>;
}

/// Build the extractor described by `config`.
pub fn from_config(config: &SourceConfig, client: &reqwest::Client) -> Box<dyn Extractor> {
    match config {
        SourceConfig::Http { url, encoding } => {
            Box::new(HttpCsvExtractor::new(client.clone(), url.clone(), *encoding))
        }
        SourceConfig::File { path, encoding } => Box::new(FileExtractor::new(path.clone(), *encoding)),
        SourceConfig::Kaggle {
            dataset,
            member,
            api_base,
            username,
            key,
            encoding,
        } => {
            let credentials = match (username, key) {
                (Some(u), Some(k)) => Some(KaggleCredentials {
                    username: u.clone(),
                    key: k.clone(),
                }),
                _ => None,
            };
            Box::new(
                KaggleExtractor::new(client.clone(), dataset.clone(), member.clone())
                    .with_api_base(api_base.clone())
                    .with_credentials(credentials)
                    .with_encoding(*encoding),
            )
        }
        SourceConfig::Meteostat {
            station,
            start,
            end,
            base_url,
        } => Box::new(
            MeteostatExtractor::new(client.clone(), station.clone(), *start, *end)
                .with_base_url(base_url.clone()),
        ),
    }
}

/// Send `request` and return the response body. Connection failures and non-success statuses are
/// both `SourceUnavailable`.
pub(crate) async fn fetch_bytes(request: reqwest::RequestBuilder, source_ref: &str) -> Result<Vec<u8>> {
    let unavailable = |message: String| PipelineError::SourceUnavailable {
        source_ref: source_ref.to_string(),
        message,
    };
    let response = request.send().await.map_err(|e| unavailable(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(unavailable(format!("HTTP {status}")));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| unavailable(format!("reading body: {e}")))?;
    tracing::debug!(source = %source_ref, bytes = body.len(), "Source downloaded");
    Ok(body.to_vec())
}

// ---------------------------------------------------------------------------
// ExtractTask
// ---------------------------------------------------------------------------

/// Runs an extractor and registers its output under a fixed artifact key.
pub struct ExtractTask {
    key: String,
    extractor: Box<dyn Extractor>,
}

impl ExtractTask {
    pub fn new(key: impl Into<String>, extractor: Box<dyn Extractor>) -> Self {
        Self {
            key: key.into(),
            extractor,
        }
    }
}

#[async_trait]
impl Task for ExtractTask {
    fn kind(&self) -> &str {
        "extract"
    }

    fn writes(&self) -> Vec<Resource> {
        vec![Resource::artifact(&self.key)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let source = self.extractor.source_ref();
        tracing::info!(task = %ctx.task_id, source = %source, "Extracting");
        let dataset = self.extractor.extract().await?;
        if dataset.columns().is_empty() {
            return Err(PipelineError::SourceFormatError {
                source_ref: source,
                message: "no columns".into(),
            });
        }
        ctx.save_dataset(&self.key, &dataset).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::events::EventEmitter;
    use crimeflow_frame::{Encoding, Value};
    use crimeflow_types::RunId;

    struct Fixed(Dataset);

    #[async_trait]
    impl Extractor for Fixed {
        fn source_ref(&self) -> String {
            "fixed".into()
        }
        async fn extract(&self) -> Result<Dataset> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn extract_task_registers_its_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TaskContext::new(
            RunId::new("r1").unwrap(),
            "extract_crimes",
            ArtifactStore::new(),
            dir.path(),
            EventEmitter::default(),
        );
        let ds = Dataset::from_rows(["INCIDENT_NUMBER"], vec![vec![Value::text("I1")]]).unwrap();
        let task = ExtractTask::new("crimes_raw", Box::new(Fixed(ds)));
        assert_eq!(task.writes(), vec![Resource::artifact("crimes_raw")]);

        task.run(&ctx).await.unwrap();
        let back = ctx.load_dataset("crimes_raw").await.unwrap();
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn config_selects_extractor() {
        let client = reqwest::Client::new();
        let e = from_config(
            &SourceConfig::File {
                path: "data/crime.csv".into(),
                encoding: Encoding::Latin1,
            },
            &client,
        );
        assert_eq!(e.source_ref(), "data/crime.csv");
        let e = from_config(&crate::config::SourcesConfig::default().crimes, &client);
        assert_eq!(e.source_ref(), "kaggle:AnalyzeBoston/crimes-in-boston/crime.csv");
    }
}
