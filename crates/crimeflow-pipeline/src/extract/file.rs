use std::path::PathBuf;

use async_trait::async_trait;

use crimeflow_frame::{read_csv, Dataset, Encoding};
use crimeflow_types::{PipelineError, Result};

use super::Extractor;

/// Reads a CSV file from local disk.
#[derive(Debug, Clone)]
pub struct FileExtractor {
    path: PathBuf,
    encoding: Encoding,
}

impl FileExtractor {
    pub fn new(path: impl Into<PathBuf>, encoding: Encoding) -> Self {
        Self {
            path: path.into(),
            encoding,
        }
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    fn source_ref(&self) -> String {
        self.path.display().to_string()
    }

    async fn extract(&self) -> Result<Dataset> {
        let source = self.source_ref();
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| PipelineError::SourceUnavailable {
                source_ref: source.clone(),
                message: e.to_string(),
            })?;
        read_csv(&bytes, self.encoding, &source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crimeflow_frame::Value;

    #[tokio::test]
    async fn reads_latin1_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crime.csv");
        std::fs::write(&path, b"INCIDENT_NUMBER,STREET\nI1,CAF\xc9 ST\n").unwrap();

        let ds = FileExtractor::new(&path, Encoding::Latin1).extract().await.unwrap();
        assert_eq!(ds.rows()[0][1], Value::text("CAF\u{c9} ST"));
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let err = FileExtractor::new("/definitely/not/here.csv", Encoding::Utf8)
            .extract()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
        assert!(err.kind().is_transient());
    }

    #[tokio::test]
    async fn garbage_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, b"a,b\n1,2,3\n").unwrap();
        let err = FileExtractor::new(&path, Encoding::Utf8).extract().await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceFormatError { .. }));
    }
}
