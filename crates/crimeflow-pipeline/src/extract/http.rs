use async_trait::async_trait;

use crimeflow_frame::{read_csv, Dataset, Encoding};
use crimeflow_types::Result;

use super::{fetch_bytes, Extractor};

/// Downloads a CSV document with a plain GET.
#[derive(Debug, Clone)]
pub struct HttpCsvExtractor {
    client: reqwest::Client,
    url: String,
    encoding: Encoding,
}

impl HttpCsvExtractor {
    pub fn new(client: reqwest::Client, url: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            client,
            url: url.into(),
            encoding,
        }
    }
}

#[async_trait]
impl Extractor for HttpCsvExtractor {
    fn source_ref(&self) -> String {
        self.url.clone()
    }

    async fn extract(&self) -> Result<Dataset> {
        let bytes = fetch_bytes(self.client.get(&self.url), &self.url).await?;
        read_csv(&bytes, self.encoding, &self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crimeflow_types::PipelineError;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn downloads_and_parses_csv() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shootings.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(
                "\u{feff}_id,incident_num,shooting_date\n1,I1,2021-06-01 00:10:00+00\n".as_bytes(),
            ))
            .mount(&server)
            .await;

        let url = format!("{}/shootings.csv", server.uri());
        let ds = HttpCsvExtractor::new(reqwest::Client::new(), url, Encoding::Utf8)
            .extract()
            .await
            .unwrap();
        assert_eq!(ds.columns(), ["_id", "incident_num", "shooting_date"]);
        assert_eq!(ds.len(), 1);
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = format!("{}/shootings.csv", server.uri());
        let err = HttpCsvExtractor::new(reqwest::Client::new(), url.clone(), Encoding::Utf8)
            .extract()
            .await
            .unwrap_err();
        match err {
            PipelineError::SourceUnavailable { source_ref, message } => {
                assert_eq!(source_ref, url);
                assert!(message.contains("503"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let err = HttpCsvExtractor::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/shootings.csv",
            Encoding::Utf8,
        )
        .extract()
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
    }
}
