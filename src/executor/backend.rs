use async_trait::async_trait;

use crate::errors::{DroidClawError, DroidClawResult};

/// Android key events used by the action set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Home,
    Back,
    Enter,
    AppSwitch,
}

impl KeyCode {
    /// `KEYCODE_*` value understood by `input keyevent`.
    pub fn code(self) -> u32 {
        match self {
            KeyCode::Home => 3,
            KeyCode::Back => 4,
            KeyCode::Enter => 66,
            KeyCode::AppSwitch => 187,
        }
    }
}

/// Screen capture and input injection for one device.
///
/// Implementations return [`DroidClawError::DeviceUnavailable`] when the device
/// cannot be reached at all, and [`DroidClawError::DeviceCommand`] when it was
/// reached but refused the command. Coordinates are device pixels.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Encoded screenshot (PNG) of the current screen.
    async fn capture_screen(&self) -> DroidClawResult<Vec<u8>>;

    async fn tap(&self, x: u32, y: u32) -> DroidClawResult<()>;

    async fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u32) -> DroidClawResult<()>;

    async fn input_text(&self, text: &str) -> DroidClawResult<()>;

    async fn press_key(&self, key: KeyCode) -> DroidClawResult<()>;

    async fn launch_app(&self, package: &str) -> DroidClawResult<()>;

    /// Ids of connected devices that are ready for commands.
    async fn list_devices(&self) -> DroidClawResult<Vec<String>>;

    /// Physical (or overridden) display size in pixels.
    async fn screen_size(&self) -> DroidClawResult<(u32, u32)>;

    /// Raw uiautomator XML for the current screen.
    async fn dump_ui_hierarchy(&self) -> DroidClawResult<String> {
        Err(DroidClawError::DeviceCommand(
            "UI hierarchy dump is not supported by this backend".into(),
        ))
    }
}
