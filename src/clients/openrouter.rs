//! OpenRouter chat-completions client.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::traits::{ChatMessage, CompletionClient, CompletionOptions, DEFAULT_MODEL};
use crate::config::Config;
use crate::error::{Result, SomaError};
use crate::redact::sanitize_upstream_body;

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Connection settings for [`OpenRouterClient`].
#[derive(Clone)]
pub struct OpenRouterSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub default_model: String,
    pub timeout: Duration,
    pub referer: String,
    pub title: String,
}

impl Default for OpenRouterSettings {
    fn default() -> Self {
        Self {
            endpoint: OPENROUTER_URL.to_string(),
            api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            referer: "http://localhost:5173".to_string(),
            title: "SymptomAI".to_string(),
        }
    }
}

impl fmt::Debug for OpenRouterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRouterSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("default_model", &self.default_model)
            .field("timeout", &self.timeout)
            .field("referer", &self.referer)
            .field("title", &self.title)
            .finish()
    }
}

impl OpenRouterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.upstream.base_url.clone(),
            api_key: config.runtime.openrouter_api_key.clone(),
            default_model: config
                .runtime
                .model_override
                .clone()
                .unwrap_or_else(|| config.upstream.model.clone()),
            timeout: Duration::from_millis(config.runtime.upstream_timeout_ms),
            referer: config.allowed_origin().to_string(),
            title: config.upstream.title.clone(),
        }
    }
}

/// Request body for `/chat/completions`.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    settings: OpenRouterSettings,
}

impl OpenRouterClient {
    pub fn new(settings: OpenRouterSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SomaError::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, settings })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(OpenRouterSettings::from_config(config))
    }

    pub fn settings(&self) -> &OpenRouterSettings {
        &self.settings
    }
}

/// Build the wire request for one call.
#[doc(hidden)]
pub fn build_request<'a>(
    default_model: &'a str,
    messages: &'a [ChatMessage],
    options: &'a CompletionOptions,
) -> ChatRequest<'a> {
    ChatRequest {
        model: options.model.as_deref().unwrap_or(default_model),
        messages,
        temperature: options.resolved_temperature(),
        max_tokens: options.resolved_max_tokens(),
    }
}

/// Pull the assistant text out of a successful response body.
///
/// Prefers `choices[0].message.content`, then `choices[0].text`, and
/// otherwise returns the whole body so a successful call always yields text.
pub fn completion_text(body: &str) -> String {
    let Ok(val) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    if let Some(choice) = val.get("choices").and_then(|c| c.get(0)) {
        if let Some(content) = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
        {
            return content.to_string();
        }
        if let Some(text) = choice.get("text").and_then(Value::as_str) {
            return text.to_string();
        }
    }
    val.to_string()
}

fn transport_error(err: &reqwest::Error) -> SomaError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "transport"
    };
    SomaError::UpstreamUnavailable {
        message: format!("{kind}: {err}"),
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(SomaError::MissingCredential)?;

        let body = build_request(&self.settings.default_model, messages, options);
        debug!(
            model = body.model,
            temperature = body.temperature,
            max_tokens = body.max_tokens,
            messages = messages.len(),
            "Calling completion endpoint"
        );

        let started = Instant::now();
        let resp = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.settings.referer)
            .header("X-Title", &self.settings.title)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let err = transport_error(&e);
                warn!(error = %err, "Completion request failed before a response");
                err
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            let body = sanitize_upstream_body(&body_text);
            warn!(status = status.as_u16(), body = %body, "Completion endpoint returned an error");
            return Err(SomaError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text().await.map_err(|e| transport_error(&e))?;
        debug!(
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            bytes = text.len(),
            "Completion received"
        );
        Ok(completion_text(&text))
    }

    fn has_credential(&self) -> bool {
        self.settings
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_text_prefers_message_content() {
        let body = json!({"choices": [{"message": {"content": "hello"}, "text": "other"}]});
        assert_eq!(completion_text(&body.to_string()), "hello");
    }

    #[test]
    fn completion_text_falls_back_to_choice_text() {
        let body = json!({"choices": [{"text": "legacy"}]});
        assert_eq!(completion_text(&body.to_string()), "legacy");
    }

    #[test]
    fn completion_text_falls_back_to_whole_body() {
        let body = json!({"id": "gen-1", "choices": []});
        let out = completion_text(&body.to_string());
        let reparsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(reparsed, body);
        assert_eq!(completion_text("not json"), "not json");
    }

    #[test]
    fn request_uses_defaults_and_clamps_temperature() {
        let messages = vec![ChatMessage::system("hi")];
        let opts = CompletionOptions {
            model: None,
            temperature: Some(1.7),
            max_tokens: None,
        };
        let req = build_request("openai/gpt-3.5-turbo", &messages, &opts);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "openai/gpt-3.5-turbo");
        assert_eq!(v["temperature"], 1.0);
        assert_eq!(v["max_tokens"], 800);
        assert_eq!(v["messages"][0]["role"], "system");
    }

    #[test]
    fn request_honours_model_override() {
        let messages = vec![ChatMessage::user("q")];
        let opts = CompletionOptions {
            model: Some("anthropic/claude-3-haiku".into()),
            ..CompletionOptions::sampling(0.2, 450)
        };
        let req = build_request("default", &messages, &opts);
        assert_eq!(req.model, "anthropic/claude-3-haiku");
        assert_eq!(req.max_tokens, 450);
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let client = OpenRouterClient::new(OpenRouterSettings {
            endpoint: "http://127.0.0.1:9/unused".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(!client.has_credential());
        let err = client
            .complete(&[ChatMessage::system("x")], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SomaError::MissingCredential));
    }

    #[test]
    fn debug_hides_api_key() {
        let settings = OpenRouterSettings {
            api_key: Some("sk-or-v1-secret".into()),
            ..Default::default()
        };
        let shown = format!("{settings:?}");
        assert!(!shown.contains("sk-or-v1-secret"));
    }
}
