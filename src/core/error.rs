//! Evolver 错误类型
//!
//! 三类错误（外部调用失败 / 验证失败 / 前置条件失败）中，只有外部调用与存储失败以 EvolverError 形式传播；
//! 验证失败是数据（TestResult::Fail），前置条件失败由布尔返回值 + 日志表达。

use thiserror::Error;

/// Evolver 运行过程中可能出现的错误（数据服务、网络、存储、配置、路径逃逸等）
#[derive(Error, Debug)]
pub enum EvolverError {
    /// 数据服务返回非 2xx，携带响应体原文
    #[error("Data service error ({status}): {body}")]
    DataService { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Path rejected: {0}")]
    PathRejected(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<reqwest::Error> for EvolverError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EvolverError::Timeout(err.to_string())
        } else {
            EvolverError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for EvolverError {
    fn from(err: std::io::Error) -> Self {
        EvolverError::Store(err.to_string())
    }
}
