//! 数据服务 AI 端点客户端
//!
//! POST `{system, user}`，响应 JSON 中取 `text`（或 `content`）；非 2xx 时携带响应体报错。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::message::{first_content, Message, Role};
use super::traits::{LlmClient, LlmError};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    system: &'a str,
    user: &'a str,
}

pub struct HttpLlmClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build LLM HTTP client, request timeout disabled: {}", e);
                Client::new()
            });
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            timeout_secs,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let body = GenerateRequest {
            system: first_content(messages, Role::System).unwrap_or_default(),
            user: messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or_default(),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key).header("apikey", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let generated = match serde_json::from_str::<Value>(&text) {
            Ok(json) => json
                .get("text")
                .or_else(|| json.get("content"))
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_default(),
            Err(_) => text,
        };

        if generated.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(generated)
    }
}
