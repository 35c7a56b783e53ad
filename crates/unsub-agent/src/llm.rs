//! Language model client. The agent only needs "content blocks in, text out",
//! so the seam is a single-method trait; [`AnthropicClient`] is the default.

use crate::config::LlmConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// One piece of a user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Text(String),
    /// Base64 image data.
    Image {
        media_type: String,
        data: String,
    },
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text(s.into())
    }

    /// PNG bytes, base64 encoded.
    pub fn png(bytes: &[u8]) -> Self {
        ContentBlock::Image {
            media_type: "image/png".into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ContentBlock::Text(text) => json!({ "type": "text", "text": text }),
            ContentBlock::Image { media_type, data } => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data }
            }),
        }
    }
}

/// A single-turn completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub max_tokens: u32,
    pub content: Vec<ContentBlock>,
}

impl LlmRequest {
    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }))
    }
}

/// Anything that turns a request into free-form text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<String>;
}

/// Messages API client with rate-limit backoff.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// Read the key from the variable named by `config.api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("{} is not set", config.api_key_env)))?;
        Self::new(key, config)
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete(&self, request: LlmRequest) -> Result<String> {
        let content: Vec<Value> = request.content.iter().map(ContentBlock::to_json).collect();
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": [{ "role": "user", "content": content }],
        });
        let url = format!("{}/v1/messages", self.base_url);

        for attempt in 0..=self.max_retries {
            let resp = self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            let raw = resp.text().await?;
            let json: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);

            if status == 429 || json["error"]["type"] == "rate_limit_error" {
                if attempt == self.max_retries {
                    break;
                }
                let wait = self.retry_backoff_ms * (u64::from(attempt) + 1);
                warn!("rate limited, waiting {}ms", wait);
                tokio::time::sleep(Duration::from_millis(wait)).await;
                continue;
            }

            if !status.is_success() || json.get("error").is_some() {
                let msg = json["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or(raw);
                return Err(Error::Llm(format!("{}: {}", status, msg)));
            }

            debug!(model = %request.model, "completion received");
            return response_text(&json);
        }
        Err(Error::Llm(format!(
            "rate limited after {} retries",
            self.max_retries
        )))
    }
}

/// Concatenated text blocks of a Messages API response.
fn response_text(json: &Value) -> Result<String> {
    let text: String = json["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect()
        })
        .unwrap_or_default();
    if text.is_empty() {
        return Err(Error::Llm("response contained no text".into()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_block_json() {
        assert_eq!(
            ContentBlock::text("hi").to_json(),
            json!({"type": "text", "text": "hi"})
        );
    }

    #[test]
    fn png_block_json() {
        let block = ContentBlock::png(&[0x89, b'P', b'N', b'G']);
        let v = block.to_json();
        assert_eq!(v["type"], "image");
        assert_eq!(v["source"]["type"], "base64");
        assert_eq!(v["source"]["media_type"], "image/png");
        assert_eq!(v["source"]["data"], "iVBORw==");
    }

    #[test]
    fn has_image() {
        let mut req = LlmRequest {
            model: "m".into(),
            max_tokens: 10,
            content: vec![ContentBlock::text("a")],
        };
        assert!(!req.has_image());
        req.content.insert(0, ContentBlock::png(b"x"));
        assert!(req.has_image());
    }

    #[test]
    fn response_text_joins_text_blocks() {
        let v = json!({"content": [
            {"type": "text", "text": "{\"action\":"},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": "\"done\"}"}
        ]});
        assert_eq!(response_text(&v).unwrap(), r#"{"action":"done"}"#);
    }

    #[test]
    fn response_text_empty_is_error() {
        assert!(response_text(&json!({"content": []})).is_err());
        assert!(response_text(&Value::Null).is_err());
    }
}
