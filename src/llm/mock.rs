//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 取最后一条 User 消息的首行，包装成固定的 Rust 代码块返回，输出完全确定。

use async_trait::async_trait;

use super::message::{Message, Role};
use super::traits::{LlmClient, LlmError};

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.lines().next().unwrap_or_default())
            .unwrap_or("(no input)");

        Ok(format!(
            "Mock scaffold:\n```rust\n//! {}\n\npub fn scaffold() -> bool {{\n    true\n}}\n```\n",
            last_user.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::extract_code_block;

    #[tokio::test]
    async fn test_mock_reply_contains_code_block() {
        let reply = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("Create src/a.rs\nmore")])
            .await
            .unwrap();
        let code = extract_code_block(&reply);
        assert!(code.starts_with("//! Create src/a.rs"));
        assert!(code.contains("pub fn scaffold()"));
    }
}
