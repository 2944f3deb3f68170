//! Anthropic Messages API provider.
//!
//! Authenticates with the standard `x-api-key` header. System messages are
//! lifted into the top-level `system` field as the Messages API requires.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::providers::provider::{
    ChatMessage, FinishReason, GenerationProvider, GenerationRequest, GenerationResponse,
    ProviderSettings, Role, TokenUsage,
};

const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    settings: ProviderSettings,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(settings: ProviderSettings) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::RequestFailed {
                provider: settings.id.clone(),
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client, settings })
    }

    async fn send_request(
        &self,
        body: &MessagesRequest,
    ) -> Result<MessagesResponse, GenerationError> {
        let url = format!(
            "{}/v1/messages",
            self.settings.base_url.trim_end_matches('/')
        );
        tracing::debug!(url = %url, model = %self.settings.model, "sending messages request");

        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("anthropic-version", API_VERSION);
        if let Some(key) = &self.settings.api_key {
            request = request.header("x-api-key", key.expose_secret());
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed {
                provider: self.settings.id.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let response_text =
            response
                .text()
                .await
                .map_err(|e| GenerationError::RequestFailed {
                    provider: self.settings.id.clone(),
                    reason: format!("failed to read response body: {e}"),
                })?;

        if !status.is_success() {
            if status.as_u16() == 401 {
                return Err(GenerationError::AuthFailed {
                    provider: self.settings.id.clone(),
                });
            }
            if status.as_u16() == 429 {
                return Err(GenerationError::RateLimited {
                    provider: self.settings.id.clone(),
                    retry_after: None,
                });
            }
            return Err(GenerationError::RequestFailed {
                provider: self.settings.id.clone(),
                reason: format!("HTTP {}: {}", status, body_snippet(&response_text)),
            });
        }

        serde_json::from_str(&response_text).map_err(|e| GenerationError::InvalidResponse {
            provider: self.settings.id.clone(),
            reason: format!("JSON parse error: {}. Raw: {}", e, body_snippet(&response_text)),
        })
    }
}

/// First 200 bytes of an error body, cut back to a character boundary.
fn body_snippet(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

// -- Messages API request/response types --

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Convert messages to Messages API format.
///
/// System messages are accumulated into the top-level `system` string,
/// everything else keeps its role with plain text content.
fn convert_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ApiMessage>) {
    let mut system_text: Option<String> = None;
    let mut api_messages = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                if let Some(existing) = &mut system_text {
                    existing.push_str("\n\n");
                    existing.push_str(&msg.content);
                } else {
                    system_text = Some(msg.content);
                }
            }
            Role::User | Role::Assistant => {
                api_messages.push(ApiMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content,
                });
            }
        }
    }

    (system_text, api_messages)
}

fn parse_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

fn extract_text(blocks: &[ContentBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        if let ContentBlock::Text { text: t } = block {
            text.push_str(t);
        }
    }
    text
}

#[async_trait]
impl GenerationProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.settings.id
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (
            self.settings.input_cost_per_token,
            self.settings.output_cost_per_token,
        )
    }

    async fn generate(
        &self,
        req: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let (system, messages) = convert_messages(req.messages);

        let request = MessagesRequest {
            model: self.settings.model.clone(),
            messages,
            max_tokens: req.max_tokens.unwrap_or(1024),
            system,
            temperature: req.temperature,
        };

        let response = self.send_request(&request).await?;

        Ok(GenerationResponse {
            content: extract_text(&response.content),
            usage: TokenUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
            },
            finish_reason: parse_stop_reason(response.stop_reason.as_deref()),
        })
    }
}
