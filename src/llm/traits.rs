//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式，可带图片）。

use async_trait::async_trait;
use thiserror::Error;

use super::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回首条回复文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}
