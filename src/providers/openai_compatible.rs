//! OpenAI-compatible generation provider.
//!
//! Speaks the Chat Completions dialect, which covers most hosted and local
//! inference endpoints (OpenAI, Groq, Together, vLLM, LM Studio, Ollama in
//! OpenAI mode). The API key is optional so local endpoints work without
//! credentials.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::providers::provider::{
    ChatMessage, FinishReason, GenerationProvider, GenerationRequest, GenerationResponse,
    ProviderSettings, TokenUsage,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible Chat Completions API provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    settings: ProviderSettings,
}

impl OpenAiCompatibleProvider {
    /// Create a new OpenAI-compatible provider.
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

    /// Construct the API URL for a given path.
    /// Strips a trailing `/v1` from the base URL to avoid double `/v1`.
    fn api_url(&self, path: &str) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{}/v1/{}", base, path.trim_start_matches('/'))
    }

    /// Add the Authorization header if an API key is configured.
    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key.expose_secret())),
            None => request,
        }
    }

    async fn send_request(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GenerationError> {
        let url = self.api_url("chat/completions");
        tracing::debug!(url = %url, model = %self.settings.model, "sending chat completion request");

        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        let request = self.add_auth_header(request);

        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed {
                provider: self.settings.id.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let retry_after = retry_after_header(&response);
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
                    retry_after,
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

/// Parse a `Retry-After` header given in whole seconds.
fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// -- Chat Completions API request/response types --

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

impl From<ChatMessage> for ApiMessage {
    fn from(msg: ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatibleProvider {
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
        let request = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: req.messages.into_iter().map(ApiMessage::from).collect(),
            max_tokens: Some(req.max_tokens.unwrap_or(1024)),
            temperature: req.temperature,
        };

        let response = self.send_request(&request).await?;

        let choice =
            response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| GenerationError::InvalidResponse {
                    provider: self.settings.id.clone(),
                    reason: "no choices in response".to_string(),
                })?;

        Ok(GenerationResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: TokenUsage {
                input_tokens: response.usage.prompt_tokens,
                output_tokens: response.usage.completion_tokens,
            },
            finish_reason: parse_finish_reason(choice.finish_reason.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn provider(base_url: &str) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(ProviderSettings {
            id: "groq-fast".to_string(),
            base_url: base_url.to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            api_key: None,
            input_cost_per_token: dec!(0.00000005),
            output_cost_per_token: dec!(0.00000008),
        })
        .unwrap()
    }

    #[test]
    fn api_url_appends_v1_path() {
        let p = provider("https://api.groq.com");
        assert_eq!(
            p.api_url("chat/completions"),
            "https://api.groq.com/v1/chat/completions"
        );
    }

    #[test]
    fn api_url_strips_duplicate_v1() {
        let p = provider("https://api.groq.com/v1/");
        assert_eq!(
            p.api_url("chat/completions"),
            "https://api.groq.com/v1/chat/completions"
        );
    }

    #[test]
    fn request_serializes_without_unset_options() {
        let request = ChatCompletionRequest {
            model: "llama-3.1-8b-instant".to_string(),
            messages: vec![ChatMessage::user("how much iron in lentils?").into()],
            max_tokens: Some(1024),
            temperature: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 1024);
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn response_parses_with_missing_usage() {
        let raw = r#"{"choices":[{"message":{"content":"About 3.3 mg."},"finish_reason":"stop"}]}"#;
        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.usage.prompt_tokens, 0);
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("About 3.3 mg.")
        );
    }

    #[test]
    fn finish_reason_maps_known_values() {
        assert_eq!(parse_finish_reason(Some("stop")), FinishReason::Stop);
        assert_eq!(parse_finish_reason(Some("length")), FinishReason::Length);
        assert_eq!(
            parse_finish_reason(Some("content_filter")),
            FinishReason::ContentFilter
        );
        assert_eq!(parse_finish_reason(None), FinishReason::Unknown);
    }

    #[test]
    fn cost_accounts_for_both_directions() {
        let p = provider("https://api.groq.com");
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
        };
        assert_eq!(p.calculate_cost(&usage), dec!(0.00009));
    }

    #[test]
    fn error_body_snippet_respects_utf8_boundaries() {
        let body = format!("{}é rate limit exceeded", "x".repeat(199));
        assert_eq!(body_snippet(&body), "x".repeat(199));

        let short = r#"{"error":"modelo no válido"}"#;
        assert_eq!(body_snippet(short), short);
    }
}
