//! 文本生成能力抽象
//!
//! 流水线只依赖 LlmClient：模板回退（Mock）、OpenAI 兼容端点、数据服务 AI 端点可互换。

use async_trait::async_trait;
use thiserror::Error;

use super::message::Message;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// 文本生成客户端：prompt 进，文本出
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}
