//! HTTP adapters: a remote extraction service and an alert webhook.

use std::time::Duration;

use async_trait::async_trait;
use greenledger_core::{Alert, ExtractedField};
use greenledger_engine::{
    DeliveryError, ExtractionAdapter, ExtractionError, NotificationSink, parse_fields,
};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl SyncError {
    /// Timeouts, throttling, server errors, and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Server { status, .. } => matches!(*status, 408 | 429 | 500..),
            Self::InvalidUrl { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::InvalidUrl { .. } => None,
        }
    }
}

fn client() -> Result<reqwest::Client, SyncError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?)
}

fn parse_url(url: &str) -> Result<String, SyncError> {
    reqwest::Url::parse(url).map_err(|e| SyncError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(url.trim_end_matches('/').to_string())
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SyncError::Server {
        status: status.as_u16(),
        body,
    })
}

/// Posts documents to a remote extraction service at `{base_url}/extract`.
///
/// The request body is the raw document with its MIME type as
/// `Content-Type`; the response is a JSON array of fields or
/// `{"data_points": [...]}`.
pub struct HttpExtractor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpExtractor {
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        Ok(Self {
            client: client()?,
            endpoint: format!("{}/extract", parse_url(base_url)?),
        })
    }

    async fn post_document(&self, bytes: &[u8], mime_type: &str) -> Result<Vec<u8>, SyncError> {
        debug!(endpoint = %self.endpoint, mime_type, size = bytes.len(), "posting document");
        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, mime_type)
            .body(bytes.to_vec())
            .send()
            .await?;
        let body = check(resp).await?.bytes().await?;
        Ok(body.to_vec())
    }
}

fn extraction_error(e: SyncError, mime_type: &str) -> ExtractionError {
    match e.status() {
        Some(415) => ExtractionError::Unsupported(mime_type.to_string()),
        _ if e.is_transient() => ExtractionError::Transient(e.to_string()),
        _ => ExtractionError::Malformed(e.to_string()),
    }
}

#[async_trait]
impl ExtractionAdapter for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<Vec<ExtractedField>, ExtractionError> {
        let body = self
            .post_document(bytes, mime_type)
            .await
            .map_err(|e| extraction_error(e, mime_type))?;
        let fields = parse_fields(&body)?;
        info!(count = fields.len(), "extracted fields from service");
        Ok(fields)
    }
}

/// Posts each alert as JSON to a webhook URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self, SyncError> {
        Ok(Self {
            client: client()?,
            url: parse_url(url)?,
        })
    }

    async fn post_alert(&self, alert: &Alert) -> Result<(), SyncError> {
        let resp = self.client.post(&self.url).json(alert).send().await?;
        check(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
        self.post_alert(alert).await.map_err(|e| {
            if e.is_transient() {
                DeliveryError::Transient(e.to_string())
            } else {
                DeliveryError::Rejected(e.to_string())
            }
        })?;
        info!(alert = %alert.id, url = %self.url, "alert delivered");
        Ok(())
    }
}
