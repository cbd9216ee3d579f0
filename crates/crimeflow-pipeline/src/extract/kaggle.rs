use std::io::{Cursor, Read};

use async_trait::async_trait;

use crimeflow_frame::{read_csv, Dataset, Encoding};
use crimeflow_types::{PipelineError, Result};

use super::{fetch_bytes, Extractor};
use crate::config::DEFAULT_KAGGLE_API;

#[derive(Clone, PartialEq, Eq)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

impl std::fmt::Debug for KaggleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KaggleCredentials")
            .field("username", &self.username)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl KaggleCredentials {
    /// Read `KAGGLE_USERNAME` and `KAGGLE_KEY`.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("KAGGLE_USERNAME").ok()?;
        let key = std::env::var("KAGGLE_KEY").ok()?;
        Some(Self { username, key })
    }
}

/// Downloads a dataset archive from the Kaggle API and reads one CSV member out of it.
#[derive(Debug, Clone)]
pub struct KaggleExtractor {
    client: reqwest::Client,
    /// `owner/name`
    dataset: String,
    member: String,
    api_base: String,
    credentials: Option<KaggleCredentials>,
    encoding: Encoding,
}

impl KaggleExtractor {
    pub fn new(client: reqwest::Client, dataset: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            client,
            dataset: dataset.into(),
            member: member.into(),
            api_base: DEFAULT_KAGGLE_API.to_string(),
            credentials: None,
            encoding: Encoding::Latin1,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Explicit credentials; `None` falls back to the environment at extraction time.
    pub fn with_credentials(mut self, credentials: Option<KaggleCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn download_url(&self) -> String {
        format!(
            "{}/datasets/download/{}",
            self.api_base.trim_end_matches('/'),
            self.dataset
        )
    }
}

/// Pull `member` out of a zip archive. Entries are matched on their file name, ignoring any
/// directory prefix.
fn unzip_member(archive: &[u8], member: &str, source: &str) -> Result<Vec<u8>> {
    let format_error = |message: String| PipelineError::SourceFormatError {
        source_ref: source.to_string(),
        message,
    };
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| format_error(format!("not a zip archive: {e}")))?;
    for i in 0..zip.len() {
        let mut file = zip
            .by_index(i)
            .map_err(|e| format_error(format!("zip entry {i}: {e}")))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().rsplit('/').next().unwrap_or_default().to_string();
        if name == member {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
                .map_err(|e| format_error(format!("reading {member}: {e}")))?;
            tracing::debug!(member, bytes = contents.len(), "Archive member extracted");
            return Ok(contents);
        }
    }
    Err(format_error(format!("archive has no member '{member}'")))
}

#[async_trait]
impl Extractor for KaggleExtractor {
    fn source_ref(&self) -> String {
        format!("kaggle:{}/{}", self.dataset, self.member)
    }

    async fn extract(&self) -> Result<Dataset> {
        let source = self.source_ref();
        let mut request = self.client.get(self.download_url());
        match self.credentials.clone().or_else(KaggleCredentials::from_env) {
            Some(c) => request = request.basic_auth(c.username, Some(c.key)),
            None => tracing::warn!(source = %source, "No Kaggle credentials configured"),
        }
        let archive = fetch_bytes(request, &source).await?;
        let member = unzip_member(&archive, &self.member, &source)?;
        read_csv(&member, self.encoding, &source)
    }
}
