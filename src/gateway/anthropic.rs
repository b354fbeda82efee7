//! HTTP-backed gateway against Anthropic's Messages API.

use super::{Decoding, LLMMetadata, ModelGateway, entropy_from_logprobs, estimate_cost, extract_code, with_timeout};
use crate::error::{QuestError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

const API_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Talks to the Anthropic Messages API. Constructed with an API key read
/// from configuration/environment; absence of a key is a caller-side
/// `ConfigurationMissing` before this type is ever built (see
/// `orchestrator::build_gateway`).
pub struct AnthropicGateway {
    api_key: String,
    http_client: reqwest::Client,
}

impl AnthropicGateway {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            http_client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: UsageResponse,
    /// Non-standard extension some Messages-API-compatible providers
    /// attach when logprobs were requested; absent on providers (like
    /// Anthropic's own endpoint today) that don't support them, in which
    /// case entropy is reported as unknown per §4.1.
    #[serde(default)]
    logprobs: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[async_trait::async_trait]
impl ModelGateway for AnthropicGateway {
    async fn complete(
        &self,
        prompt: &str,
        decoding: &Decoding,
        collect_logprobs: bool,
    ) -> Result<(String, LLMMetadata)> {
        let started = Instant::now();

        let body = MessagesRequest {
            model: &decoding.model,
            max_tokens: decoding.max_tokens,
            temperature: decoding.temperature,
            top_p: decoding.top_p,
            messages: vec![RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self
            .http_client
            .post(format!("{API_BASE_URL}/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        if collect_logprobs {
            request = request.header("x-quest-collect-logprobs", "true");
        }

        let call = async {
            let response = request
                .send()
                .await
                .map_err(|e| QuestError::UpstreamError(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| QuestError::UpstreamError(e.to_string()))?;

            if !status.is_success() {
                if let Ok(err) = serde_json::from_str::<AnthropicErrorResponse>(&text) {
                    return Err(QuestError::UpstreamError(format!(
                        "{} ({}): {}",
                        err.error.error_type, status, err.error.message
                    )));
                }
                return Err(QuestError::UpstreamError(format!("{status}: {text}")));
            }

            let parsed: MessagesResponse = serde_json::from_str(&text)
                .map_err(|e| QuestError::UpstreamError(format!("malformed response: {e}")))?;
            Ok(parsed)
        };

        let parsed = with_timeout(decoding.timeout_seconds, call).await?;

        let text: String = parsed.content.into_iter().map(|c| c.text).collect();
        let code = extract_code(&text);

        let (entropy, avg_logprob) = match parsed.logprobs {
            Some(logprobs) if collect_logprobs => entropy_from_logprobs(&logprobs),
            _ => (None, None),
        };

        let metadata = LLMMetadata {
            avg_logprob,
            entropy,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            estimated_cost: estimate_cost(
                &decoding.model,
                parsed.usage.input_tokens,
                parsed.usage.output_tokens,
            ),
            duration: started.elapsed(),
        };

        Ok((code, metadata))
    }
}
