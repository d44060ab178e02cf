//! 模拟器设备边界
//!
//! 设备只暴露两件事：按 (玩家, 键码, 按下/松开) 模拟输入，以及截取当前画面。

use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::core::PlayerError;
use crate::player::Button;

/// 1x1 透明 PNG，未配置截图文件时作为画面返回
const PLACEHOLDER_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// 按键到模拟器键码的映射
pub fn key_code(button: Button) -> u16 {
    match button {
        Button::A => 88,
        Button::B => 83,
        Button::Start => 13,
        Button::DpadUp => 38,
        Button::DpadDown => 40,
        Button::DpadLeft => 37,
        Button::DpadRight => 39,
        Button::LTrig => 81,
        Button::RTrig => 69,
        Button::ZTrig => 9,
        Button::CUp => 75,
        Button::CDown => 73,
        Button::CLeft => 74,
        Button::CRight => 76,
        Button::LeftStickXPlus => 72,
        Button::LeftStickXMinus => 70,
        Button::LeftStickYPlus => 71,
        Button::LeftStickYMinus => 84,
    }
}

/// 模拟器设备
#[async_trait]
pub trait EmulatorDevice: Send + Sync {
    /// pressed = true 为按下（1），false 为松开（0）
    fn simulate_input(&self, player: u8, key_code: u16, pressed: bool) -> Result<(), PlayerError>;

    /// 截取当前画面，返回 data URL
    async fn capture_screenshot(&self) -> Result<String, PlayerError>;
}

/// 固定画面设备：总是返回同一帧，输入只记录日志
pub struct StaticFrameDevice {
    frame: String,
}

impl StaticFrameDevice {
    pub fn placeholder() -> Self {
        Self {
            frame: format!("data:image/png;base64,{}", PLACEHOLDER_PNG),
        }
    }

    /// 从图片文件加载画面（按扩展名判断 MIME，默认 JPEG）
    pub fn from_file(path: &Path) -> Result<Self, PlayerError> {
        let bytes = std::fs::read(path)
            .map_err(|e| PlayerError::Device(format!("read {}: {}", path.display(), e)))?;
        let mime = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        };
        Ok(Self {
            frame: format!("data:{};base64,{}", mime, STANDARD.encode(bytes)),
        })
    }
}

#[async_trait]
impl EmulatorDevice for StaticFrameDevice {
    fn simulate_input(&self, player: u8, key_code: u16, pressed: bool) -> Result<(), PlayerError> {
        tracing::info!(
            "simulateInput(player={}, key={}, value={})",
            player,
            key_code,
            u8::from(pressed)
        );
        Ok(())
    }

    async fn capture_screenshot(&self) -> Result<String, PlayerError> {
        Ok(self.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[test]
    fn test_key_codes_are_distinct() {
        let codes: HashSet<u16> = Button::ALL.iter().map(|b| key_code(*b)).collect();
        assert_eq!(codes.len(), Button::ALL.len());
        assert_eq!(key_code(Button::Start), 13);
        assert_eq!(key_code(Button::LeftStickYMinus), 84);
    }

    #[tokio::test]
    async fn test_static_frame_from_file() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"abc").unwrap();

        let device = StaticFrameDevice::from_file(file.path()).unwrap();
        assert_eq!(
            device.capture_screenshot().await.unwrap(),
            "data:image/png;base64,YWJj"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_device_error() {
        let err = StaticFrameDevice::from_file(Path::new("/nonexistent/frame.jpg"))
            .err()
            .unwrap();
        assert!(matches!(err, PlayerError::Device(_)));

        let placeholder = StaticFrameDevice::placeholder();
        assert!(placeholder
            .capture_screenshot()
            .await
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }
}
