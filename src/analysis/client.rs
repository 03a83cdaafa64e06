use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::models::{AnalysisOptions, AnalysisResponse};
use crate::error::AppError;

/// Upper bound on upstream diagnostic text forwarded to callers.
pub const MAX_DETAIL_CHARS: usize = 300;

// key: analysis-upstream-error -> classified failure of the analysis service
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("analysis service quota exhausted")]
    SerpQuota,
    #[error("analysis service timed out")]
    Timeout,
    #[error("analysis service failed with {status}: {detail}")]
    Failed { status: u16, detail: String },
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::SerpQuota => AppError::SerpQuota,
            UpstreamError::Timeout => AppError::Timeout,
            UpstreamError::Failed { status, detail } => AppError::Upstream { status, detail },
        }
    }
}

/// Classifies a non-success upstream response by status and body content.
pub fn classify_failure(status: u16, body: &str) -> UpstreamError {
    let lowered = body.to_lowercase();
    if status == 429 || lowered.contains("exceeded your api calls") {
        return UpstreamError::SerpQuota;
    }
    if status == 504 || lowered.contains("timeout") {
        return UpstreamError::Timeout;
    }
    UpstreamError::Failed {
        status,
        detail: body.chars().take(MAX_DETAIL_CHARS).collect(),
    }
}

fn classify_transport(err: &reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        return UpstreamError::Timeout;
    }
    let message = err.to_string();
    if message.to_lowercase().contains("timeout") {
        return UpstreamError::Timeout;
    }
    UpstreamError::Failed {
        status: err.status().map(|status| status.as_u16()).unwrap_or(502),
        detail: message.chars().take(MAX_DETAIL_CHARS).collect(),
    }
}

// key: analysis-backend -> external keyword analysis service
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(
        &self,
        keywords: &[String],
        options: &AnalysisOptions,
    ) -> Result<AnalysisResponse, UpstreamError>;
}

#[derive(Serialize)]
struct UpstreamOptions<'a> {
    include_supply: bool,
    region: &'a str,
    timeframe: &'a str,
}

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    keywords: &'a [String],
    options: UpstreamOptions<'a>,
}

#[derive(Clone)]
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpAnalysisClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AnalysisBackend for HttpAnalysisClient {
    async fn analyze(
        &self,
        keywords: &[String],
        options: &AnalysisOptions,
    ) -> Result<AnalysisResponse, UpstreamError> {
        let body = UpstreamRequest {
            keywords,
            options: UpstreamOptions {
                include_supply: options.mode.include_supply(),
                region: &options.region,
                timeframe: &options.timeframe,
            },
        };
        let mut request = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(&body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        debug!(count = keywords.len(), include_supply = body.options.include_supply, "calling analysis service");

        let response = request.send().await.map_err(|err| {
            warn!(?err, "analysis service request failed");
            classify_transport(&err)
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let classified = classify_failure(status.as_u16(), &text);
            warn!(%status, kind = ?classified, "analysis service rejected request");
            return Err(classified);
        }
        response.json::<AnalysisResponse>().await.map_err(|err| {
            warn!(?err, "analysis service returned an unreadable body");
            UpstreamError::Failed {
                status: 502,
                detail: err.to_string().chars().take(MAX_DETAIL_CHARS).collect(),
            }
        })
    }
}
