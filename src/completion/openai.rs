//! OpenAI-compatible chat/completions client.
//! One pooled reqwest client, bearer auth, bounded timeout. Failures are
//! returned to the caller as-is; retry policy belongs to whoever calls us.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatTransport, CompletionError, ConversationTurn, UpstreamError};

/// Sampling temperature sent with every request.
pub const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ConversationTurn>,
    pub temperature: f32,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ChatRequest {
    /// Request that asks for a single JSON object as the reply body.
    pub fn json_object(model: impl Into<String>, messages: Vec<ConversationTurn>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: TEMPERATURE,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self::with_http_client(http, api_key, base_url))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatTransport for OpenAiClient {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<String, CompletionError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "completion endpoint returned error status");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: body_text.chars().take(200).collect(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(classify_transport_error)?;
        let parsed: ChatResponse = serde_json::from_slice(&body).map_err(|e| {
            CompletionError::MalformedCompletionPayload(format!("response body: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                CompletionError::MalformedCompletionPayload("no choice content in response".into())
            })?;

        debug!(bytes = content.len(), model = %request.model, "completion received");
        Ok(content)
    }
}

fn classify_transport_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        UpstreamError::Timeout.into()
    } else {
        UpstreamError::Transport(e.to_string()).into()
    }
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_body_shape() {
        let req = ChatRequest::json_object("gpt-4o-mini", vec![ConversationTurn::user("2+2=?")]);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "2+2=?"}],
                "temperature": 0.7f32,
                "response_format": {"type": "json_object"}
            })
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = OpenAiClient::with_http_client(
            reqwest::Client::new(),
            "k",
            "https://api.example.com/v1/",
        );
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
    }
}
