//! 决策端（Decision Oracle）
//!
//! 两步：describe 把截图变成文字描述，choose_button 从描述中选出一个按键名。
//! 两步都可能失败或很慢；输出的按键名由会话用 [`validate_choice`] 校验，非法时退回默认按键。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::action::Button;
use crate::core::PlayerError;
use crate::llm::{LlmClient, Message};

const DESCRIBE_PROMPT: &str = "Describe this N64 game screenshot for an AI player. Focus on actionable elements, player position, enemies, items, and overall game state relevant for deciding the next move.";

const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// 画面 → 按键 的决策端
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// 描述截图（screenshot 为 data URL 或裸 base64）
    async fn describe(&self, screenshot: &str) -> Result<String, PlayerError>;

    /// 根据描述选择下一个按键，返回原始按键名（未校验）
    async fn choose_button(&self, description: &str) -> Result<String, PlayerError>;
}

/// 校验决策端输出：合法返回 (按键, false)，否则返回 (默认按键, true)
pub fn validate_choice(raw: &str, default: Button) -> (Button, bool) {
    match raw.parse::<Button>() {
        Ok(button) => (button, false),
        Err(e) => {
            tracing::warn!("Oracle returned {}, defaulting to {}", e, default);
            (default, true)
        }
    }
}

/// 给裸 base64 补上 JPEG data URL 前缀；已是 data URL 的原样返回
pub fn to_data_url(screenshot: &str) -> String {
    if screenshot.starts_with("data:") {
        screenshot.to_string()
    } else {
        format!("{}{}", JPEG_DATA_URL_PREFIX, screenshot)
    }
}

fn choose_prompt(description: &str) -> String {
    format!(
        "Based on the following N64 game state description, what is the best single button to press next?\n\
         Game State: \"{}\"\n\n\
         Choose ONE button from the following list. Your answer MUST be ONLY one of these button names:\n{}",
        description,
        Button::names()
    )
}

/// 视觉 LLM 决策端
pub struct LlmOracle {
    llm: Arc<dyn LlmClient>,
}

impl LlmOracle {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn describe(&self, screenshot: &str) -> Result<String, PlayerError> {
        let message = Message::user(DESCRIBE_PROMPT).with_image(to_data_url(screenshot));
        let text = self
            .llm
            .complete(&[message])
            .await
            .map_err(|e| PlayerError::OracleFailure(format!("describe: {}", e)))?;
        Ok(text.trim().to_string())
    }

    async fn choose_button(&self, description: &str) -> Result<String, PlayerError> {
        let text = self
            .llm
            .complete(&[Message::user(choose_prompt(description))])
            .await
            .map_err(|e| PlayerError::OracleFailure(format!("choose_button: {}", e)))?;
        Ok(text.trim().to_string())
    }
}

/// 固定轮换按键的决策端（无需 API Key，用于演示与测试）
pub struct ScriptedOracle {
    script: Vec<Button>,
    cursor: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Button>) -> Self {
        Self {
            script,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new(vec![
            Button::Start,
            Button::A,
            Button::DpadRight,
            Button::DpadRight,
            Button::B,
        ])
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn describe(&self, screenshot: &str) -> Result<String, PlayerError> {
        Ok(format!("Scripted player looking at a {}-byte frame", screenshot.len()))
    }

    async fn choose_button(&self, _description: &str) -> Result<String, PlayerError> {
        if self.script.is_empty() {
            return Err(PlayerError::OracleFailure("empty script".to_string()));
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(self.script[n % self.script.len()].as_str().to_string())
    }
}
