//! LLM 层：文本生成能力抽象与实现（Mock / OpenAI 兼容 / 数据服务 AI 端点）

pub mod extract;
pub mod http;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use extract::extract_code_block;
pub use http::HttpLlmClient;
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};

/// 按配置创建文本生成客户端；缺少必要参数时回退到 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let timeout = cfg.llm.timeout_secs;
    match cfg.llm.provider.to_lowercase().as_str() {
        "openai" => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
                timeout,
            ))
        }
        "http" => match cfg.data_service.ai_endpoint() {
            Some(endpoint) => {
                tracing::info!("Using data service AI endpoint ({})", endpoint);
                Arc::new(HttpLlmClient::new(
                    endpoint,
                    cfg.data_service.api_key.clone(),
                    timeout,
                ))
            }
            None => {
                tracing::warn!("LLM provider 'http' requires data_service.project_id or base_url, using Mock LLM");
                Arc::new(MockLlmClient)
            }
        },
        _ => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}
