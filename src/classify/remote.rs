//! Remote fallback classifier.
//!
//! Layer 2 of classification: when keyword scoring is inconclusive, the
//! query text is sent to a small external labeling endpoint. The call is
//! strictly bounded (client timeout plus an outer `tokio::time::timeout`)
//! and every failure is degraded by the caller to the hybrid route, so
//! this path can never take the pipeline down.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::classify::RouteType;
use crate::error::ClassifierError;

/// External query labeling service.
#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    /// Label a query with one of the three route types.
    async fn classify(&self, text: &str) -> Result<RouteType, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: String,
}

/// HTTP implementation posting `{"text": ...}` and expecting
/// `{"label": "structured" | "semantic" | "hybrid"}`.
pub struct HttpRemoteClassifier {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpRemoteClassifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ClassifierError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            }
        })?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    async fn send(&self, text: &str) -> Result<RouteType, ClassifierError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ClassifyRequest { text })
            .send()
            .await
            .map_err(|e| ClassifierError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let response_text =
            response
                .text()
                .await
                .map_err(|e| ClassifierError::RequestFailed {
                    reason: format!("failed to read response body: {e}"),
                })?;

        if !status.is_success() {
            return Err(ClassifierError::RequestFailed {
                reason: format!("HTTP {}: {}", status, body_snippet(&response_text)),
            });
        }

        let parsed: ClassifyResponse =
            serde_json::from_str(&response_text).map_err(|e| ClassifierError::InvalidResponse {
                reason: format!("JSON parse error: {}. Raw: {}", e, body_snippet(&response_text)),
            })?;

        parse_label(&parsed.label)
    }
}

#[async_trait]
impl RemoteClassifier for HttpRemoteClassifier {
    async fn classify(&self, text: &str) -> Result<RouteType, ClassifierError> {
        tracing::debug!(url = %self.url, "consulting remote classifier");

        // The client timeout covers the request itself; the outer timeout
        // guards against anything else stalling the future.
        match tokio::time::timeout(self.timeout, self.send(text)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout {
                timeout: self.timeout,
            }),
        }
    }
}

/// Parse a route label case-insensitively.
fn parse_label(label: &str) -> Result<RouteType, ClassifierError> {
    label
        .trim()
        .parse()
        .map_err(|_| ClassifierError::UnknownLabel {
            label: label.to_string(),
        })
}

/// First 200 bytes of an error body, cut back to a character boundary.
fn body_snippet(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
