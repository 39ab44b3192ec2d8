//! Completion providers.
//!
//! Synthesis talks to a language model through the one-method
//! [`CompletionProvider`] trait. [`AnthropicClient`] is the production
//! implementation over the Messages API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use dailybrief_search::retry_after_header;
use dailybrief_shared::{
    CompletionConfig, DailyBriefError, ProviderError, ProviderResult, Result,
};

use crate::prompt::Prompt;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("dailybrief/", env!("CARGO_PKG_VERSION"));

/// Text returned by one completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Model that actually answered.
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A language-model backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> ProviderResult<Completion>;

    /// Provider name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

// ---------------------------------------------------------------------------
// AnthropicClient
// ---------------------------------------------------------------------------

/// Client for `POST {base_url}/v1/messages`.
///
/// Holds the configured model followed by its fallbacks. A model the API
/// reports as missing is skipped for the rest of the client's life.
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: String,
    models: Vec<String>,
    active: AtomicUsize,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicClient {
    pub fn new(config: &CompletionConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DailyBriefError::config(format!("failed to build HTTP client: {e}")))?;

        let mut models = vec![config.model.clone()];
        for m in &config.fallback_models {
            if !models.contains(m) {
                models.push(m.clone());
            }
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            models,
            active: AtomicUsize::new(0),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// The model the next call will use.
    pub fn current_model(&self) -> &str {
        let idx = self.active.load(Ordering::Relaxed).min(self.models.len() - 1);
        &self.models[idx]
    }

    async fn send(&self, model: &str, prompt: &Prompt) -> ProviderResult<Completion> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: &prompt.system,
            messages: [Message {
                role: "user",
                content: &prompt.user,
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), retry_after, &text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("{url}: invalid response body: {e}")))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(ProviderError::Transient("empty completion".into()));
        }

        Ok(Completion {
            text,
            model: if parsed.model.is_empty() {
                model.to_string()
            } else {
                parsed.model
            },
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }
}

#[async_trait]
impl CompletionProvider for AnthropicClient {
    #[instrument(skip_all, fields(provider = "anthropic", prompt_tokens = prompt.estimated_tokens()))]
    async fn complete(&self, prompt: &Prompt) -> ProviderResult<Completion> {
        loop {
            let idx = self.active.load(Ordering::Relaxed);
            let Some(model) = self.models.get(idx) else {
                return Err(ProviderError::ModelNotFound(self.models.join(", ")));
            };

            match self.send(model, prompt).await {
                Err(ProviderError::ModelNotFound(msg)) if idx + 1 < self.models.len() => {
                    warn!(model = %model, next = %self.models[idx + 1], error = %msg, "model not found, falling back");
                    let _ = self.active.compare_exchange(
                        idx,
                        idx + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    );
                }
                Ok(completion) => {
                    debug!(
                        model = %completion.model,
                        input_tokens = completion.input_tokens,
                        output_tokens = completion.output_tokens,
                        "completion received"
                    );
                    return Ok(completion);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Map an error response from the Messages API.
///
/// 529 is Anthropic's "overloaded"; 413 and the "prompt is too long"
/// invalid-request error both mean the context window was exceeded.
fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let lowered = body.to_ascii_lowercase();
    match status {
        404 => ProviderError::ModelNotFound(body.to_string()),
        413 => ProviderError::PromptTooLarge(body.to_string()),
        400 if lowered.contains("prompt is too long") || lowered.contains("too many tokens") => {
            ProviderError::PromptTooLarge(body.to_string())
        }
        400 if lowered.contains("model:") && lowered.contains("not_found") => {
            ProviderError::ModelNotFound(body.to_string())
        }
        529 => ProviderError::Transient(format!("overloaded: {body}")),
        code => ProviderError::from_status(code, retry_after, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prompt() -> Prompt {
        Prompt {
            system: "system".into(),
            user: "write about AI".into(),
        }
    }

    fn client_for(server: &MockServer, fallbacks: &[&str]) -> AnthropicClient {
        let config = CompletionConfig {
            base_url: server.uri(),
            model: "primary-model".into(),
            fallback_models: fallbacks.iter().map(|s| s.to_string()).collect(),
            ..CompletionConfig::default()
        };
        AnthropicClient::new(&config, "sk-test").unwrap()
    }

    fn ok_body(model: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": model,
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 120, "output_tokens": 40}
        })
    }

    #[tokio::test]
    async fn sends_messages_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(serde_json::json!({
                "model": "primary-model",
                "system": "system",
                "messages": [{"role": "user", "content": "write about AI"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("primary-model", "# Title\n\nBody")))
            .expect(1)
            .mount(&server)
            .await;

        let completion = client_for(&server, &[]).complete(&prompt()).await.unwrap();
        assert_eq!(completion.text, "# Title\n\nBody");
        assert_eq!(completion.model, "primary-model");
        assert_eq!(completion.input_tokens, 120);
    }

    #[tokio::test]
    async fn falls_back_when_model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({"model": "primary-model"})))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "not_found_error", "message": "model: primary-model"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({"model": "backup-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("backup-model", "text")))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, &["backup-model"]);
        assert_eq!(client.complete(&prompt()).await.unwrap().model, "backup-model");
        assert_eq!(client.current_model(), "backup-model");
        // The missing model is not retried on the next call.
        client.complete(&prompt()).await.unwrap();
    }

    #[tokio::test]
    async fn missing_model_without_fallback_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = client_for(&server, &[]).complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn classifies_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error":{"message":"prompt is too long: 250000 tokens"}}"#),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = client_for(&server, &[]);
        assert!(matches!(
            client.complete(&prompt()).await.unwrap_err(),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            client.complete(&prompt()).await.unwrap_err(),
            ProviderError::PromptTooLarge(_)
        ));
        assert_eq!(
            client.complete(&prompt()).await.unwrap_err(),
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn empty_completion_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("primary-model", "  ")))
            .mount(&server)
            .await;

        let err = client_for(&server, &[]).complete(&prompt()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
