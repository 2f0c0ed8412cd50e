// src/provider/openai_compat.rs — Generic OpenAI-compatible chat provider
//
// Works against OpenAI, OpenRouter, vLLM, Ollama's /v1 shim and similar endpoints.
// Images are sent as `image_url` content parts, which is the vision format these
// endpoints share.

use async_trait::async_trait;

use super::{ChatRequest, ChatResponse, Message, ModelProvider, Role, TokenUsage};
use crate::infra::errors::CadLoopError;

/// Provider for any OpenAI-compatible API endpoint.
pub struct OpenAICompatProvider {
    id_str: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    pub fn new(id: impl Into<String>, api_key: String, base_url: String) -> Self {
        Self {
            id_str: id.into(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from an API key held in the named environment variable.
    pub fn from_env(base_url: &str, api_key_env: &str) -> Result<Self, CadLoopError> {
        let api_key = std::env::var(api_key_env).map_err(|_| {
            CadLoopError::Config(format!(
                "environment variable {api_key_env} is not set (needed for {base_url})"
            ))
        })?;
        Ok(Self::new("openai-compat", api_key, base_url.to_string()))
    }

    fn provider_error(&self, message: impl Into<String>, retriable: bool) -> CadLoopError {
        CadLoopError::Provider {
            provider: self.id_str.clone(),
            message: message.into(),
            retriable,
        }
    }
}

fn message_json(m: &Message) -> serde_json::Value {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    if m.images.is_empty() {
        return serde_json::json!({"role": role, "content": m.content});
    }
    let mut parts = vec![serde_json::json!({"type": "text", "text": m.content})];
    for url in &m.images {
        parts.push(serde_json::json!({"type": "image_url", "image_url": {"url": url}}));
    }
    serde_json::json!({"role": role, "content": parts})
}

pub(crate) fn request_body(request: &ChatRequest) -> serde_json::Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    messages.extend(request.messages.iter().map(message_json));

    let mut body = serde_json::json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    body
}

#[async_trait]
impl ModelProvider for OpenAICompatProvider {
    fn id(&self) -> &str {
        &self.id_str
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, CadLoopError> {
        let body = request_body(&request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header(
                "User-Agent",
                format!("cadloop/{}", env!("CARGO_PKG_VERSION")),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| self.provider_error(e.to_string(), e.is_timeout() || e.is_connect()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(0);
            return Err(CadLoopError::RateLimited {
                provider: self.id_str.clone(),
                retry_after_ms,
            });
        }
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(self.provider_error(
                format!("HTTP {status}: {error_body}"),
                status.is_server_error(),
            ));
        }

        let resp: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.provider_error(e.to_string(), false))?;

        let content = resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let usage = TokenUsage {
            input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        tracing::debug!(
            provider = %self.id_str,
            model = %request.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "chat completed"
        );

        Ok(ChatResponse { content, usage })
    }
}
