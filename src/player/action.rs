//! 出站动作与合法按键集合
//!
//! Action 只发不等（fire-and-forget）；Button 是决策端输出唯一允许的取值范围。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// N64 手柄按键（决策端必须从中选择一个）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Button {
    A,
    B,
    Start,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    LTrig,
    RTrig,
    ZTrig,
    CUp,
    CDown,
    CLeft,
    CRight,
    LeftStickXPlus,
    LeftStickXMinus,
    LeftStickYPlus,
    LeftStickYMinus,
}

impl Button {
    pub const ALL: [Button; 18] = [
        Button::A,
        Button::B,
        Button::Start,
        Button::DpadUp,
        Button::DpadDown,
        Button::DpadLeft,
        Button::DpadRight,
        Button::LTrig,
        Button::RTrig,
        Button::ZTrig,
        Button::CUp,
        Button::CDown,
        Button::CLeft,
        Button::CRight,
        Button::LeftStickXPlus,
        Button::LeftStickXMinus,
        Button::LeftStickYPlus,
        Button::LeftStickYMinus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Button::A => "A",
            Button::B => "B",
            Button::Start => "START",
            Button::DpadUp => "DPAD_UP",
            Button::DpadDown => "DPAD_DOWN",
            Button::DpadLeft => "DPAD_LEFT",
            Button::DpadRight => "DPAD_RIGHT",
            Button::LTrig => "L_TRIG",
            Button::RTrig => "R_TRIG",
            Button::ZTrig => "Z_TRIG",
            Button::CUp => "C_UP",
            Button::CDown => "C_DOWN",
            Button::CLeft => "C_LEFT",
            Button::CRight => "C_RIGHT",
            Button::LeftStickXPlus => "LEFT_STICK_X_PLUS",
            Button::LeftStickXMinus => "LEFT_STICK_X_MINUS",
            Button::LeftStickYPlus => "LEFT_STICK_Y_PLUS",
            Button::LeftStickYMinus => "LEFT_STICK_Y_MINUS",
        }
    }

    /// 逗号分隔的全部按键名（写入提示词）
    pub fn names() -> String {
        Self::ALL
            .iter()
            .map(|b| b.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 非法按键名
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid button name '{0}'")]
pub struct InvalidButton(pub String);

impl FromStr for Button {
    type Err = InvalidButton;

    /// 精确匹配（区分大小写），只去掉首尾空白
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|b| b.as_str() == name)
            .ok_or_else(|| InvalidButton(name.to_string()))
    }
}

/// 按键指令载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressButton {
    pub button: Button,
    /// 玩家序号（0 为 1P）
    pub player: u8,
    /// 按住时长（毫秒），到时自动松开
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

/// 会话发往通道的动作（嵌在 ACTION 信封中）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Action {
    #[serde(rename = "PRESS_BUTTON")]
    PressButton(PressButton),
    /// 决策端对当前画面的描述
    #[serde(rename = "AI_DESCRIPTION")]
    Describe { description: String },
    /// 循环进度提示
    #[serde(rename = "AI_STATUS_UPDATE")]
    StatusUpdate { status: String },
    /// 本端不认识的动作类型，只告警不执行
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn press(button: Button, player: u8, duration_ms: u64) -> Self {
        Action::PressButton(PressButton {
            button,
            player,
            duration_ms,
        })
    }

    pub fn status(text: impl Into<String>) -> Self {
        Action::StatusUpdate {
            status: text.into(),
        }
    }

    pub fn describe(text: impl Into<String>) -> Self {
        Action::Describe {
            description: text.into(),
        }
    }
}
