//! 显示端：持有模拟器设备，响应控制端的截图请求与按键指令

pub mod device;
pub mod runtime;

pub use device::{key_code, EmulatorDevice, StaticFrameDevice};
pub use runtime::DisplayRuntime;
