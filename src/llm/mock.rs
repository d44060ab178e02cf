//! Mock LLM 客户端（用于测试与无 API Key 运行）
//!
//! 带图片的请求回一段固定的画面描述；纯文本请求按顺序轮换几个合法按键名。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{LlmClient, LlmError, Message};

const MOCK_BUTTONS: [&str; 5] = ["START", "A", "DPAD_RIGHT", "A", "B"];

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, super::Role::User))
            .ok_or_else(|| LlmError::InvalidRequest("no user message".to_string()))?;

        if let Some(image) = &last_user.image {
            return Ok(format!(
                "Mock scene: a game frame ({} bytes of image data). The player stands still.",
                image.len()
            ));
        }

        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(MOCK_BUTTONS[n % MOCK_BUTTONS.len()].to_string())
    }
}
