use super::AnalysisClient;
use super::error::TransportError;
use crate::shared::prelude::{AnalysisKind, CharacterCounts};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

const ANALYZE_PATH: &str = "analyze";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    character_counts: CharacterCounts,
    #[serde(default)]
    original_text: Option<String>,
    #[serde(default)]
    analysis_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Talks to `GET <base>/analyze?type=..&text=..`.
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: analyze_endpoint(base_url)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// The base is treated as a directory, so `http://host/api` and
/// `http://host/api/` both end up at `http://host/api/analyze`.
fn analyze_endpoint(base_url: &Url) -> Result<Url, url::ParseError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(ANALYZE_PATH)
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    #[instrument(skip_all, fields(kind = %kind))]
    async fn fetch(
        &self,
        text: &str,
        kind: AnalysisKind,
    ) -> Result<CharacterCounts, TransportError> {
        debug!("Sending analysis request to {}", self.endpoint);
        let analysis_type: &str = kind.as_ref();

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("type", analysis_type), ("text", text)])
            .send()
            .await
            .map_err(|e| {
                warn!("Unable to reach analysis server: {}", e);
                TransportError::connection(e.to_string())
            })?;

        let status = response.status();
        debug!(status = status.as_u16(), "API response received");

        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message);
            return Err(TransportError::new(status.as_u16(), message));
        }

        let body = response.json::<AnalyzeResponse>().await.map_err(|e| {
            warn!("Unable to decode analysis response: {}", e);
            TransportError::new(status.as_u16(), Some(e.to_string()))
        })?;
        debug!(
            original_text = ?body.original_text,
            analysis_type = ?body.analysis_type,
            "Analysis response decoded"
        );

        Ok(body.character_counts)
    }
}
