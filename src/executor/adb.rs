//! [`DeviceBackend`] over the `adb` command-line tool.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::DeviceConfig;
use crate::errors::{DroidClawError, DroidClawResult};
use crate::executor::backend::{DeviceBackend, KeyCode};
use crate::executor::text_input;

const CMD_TIMEOUT: Duration = Duration::from_secs(30);

/// stderr fragments meaning the device itself is out of reach.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "no devices/emulators found",
    "not found",
    "device offline",
    "unauthorized",
    "more than one device/emulator",
];

pub struct AdbDevice {
    adb_path: String,
    serial: Option<String>,
}

impl AdbDevice {
    pub fn new(adb_path: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial,
        }
    }

    pub fn from_config(cfg: &DeviceConfig) -> Self {
        Self::new(cfg.adb_path.clone(), cfg.serial.clone())
    }

    /// Run `adb [-s serial] <args>` and return raw stdout.
    async fn run(&self, args: &[&str]) -> DroidClawResult<Vec<u8>> {
        let mut cmd = tokio::process::Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.args(args).kill_on_drop(true);

        tracing::debug!(adb = %self.adb_path, ?args, "adb command");

        let output = match tokio::time::timeout(CMD_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DroidClawError::DeviceUnavailable(format!(
                    "adb binary not found at '{}'",
                    self.adb_path
                )));
            }
            Ok(Err(e)) => {
                return Err(DroidClawError::DeviceUnavailable(format!(
                    "failed to execute adb: {e}"
                )));
            }
            Err(_) => {
                return Err(DroidClawError::DeviceUnavailable(format!(
                    "adb {} timed out after {}s",
                    args.first().copied().unwrap_or_default(),
                    CMD_TIMEOUT.as_secs()
                )));
            }
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_failure(&stderr))
        }
    }

    async fn shell(&self, args: &[&str]) -> DroidClawResult<String> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        let stdout = self.run(&full).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

/// Map adb stderr to an error, separating "device gone" from "command failed".
pub fn classify_failure(stderr: &str) -> DroidClawError {
    let msg = stderr.trim();
    let lower = msg.to_lowercase();
    let is_device_error = lower.starts_with("error:")
        && UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m));
    if is_device_error || lower.contains("no devices/emulators found") {
        DroidClawError::DeviceUnavailable(msg.to_string())
    } else {
        DroidClawError::DeviceCommand(msg.to_string())
    }
}

/// Serials in state `device` from `adb devices` output.
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            if state == "device" {
                Some(serial.to_string())
            } else {
                tracing::warn!(serial, state, "device not ready");
                None
            }
        })
        .collect()
}

/// Parse `wm size` output, preferring an override size over the physical one.
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let parse = |prefix: &str| {
        output.lines().find_map(|line| {
            let (w, h) = line.trim().strip_prefix(prefix)?.trim().split_once('x')?;
            Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
        })
    };
    parse("Override size:").or_else(|| parse("Physical size:"))
}

/// Cut the XML document out of `uiautomator dump /dev/tty` output.
pub fn extract_hierarchy_xml(output: &str) -> Option<&str> {
    let start = output.find("<?xml").or_else(|| output.find("<hierarchy"))?;
    let end = output.rfind("</hierarchy>")? + "</hierarchy>".len();
    (end > start).then(|| &output[start..end])
}

#[async_trait]
impl DeviceBackend for AdbDevice {
    async fn capture_screen(&self) -> DroidClawResult<Vec<u8>> {
        let png = self.run(&["exec-out", "screencap", "-p"]).await?;
        if png.is_empty() {
            return Err(DroidClawError::DeviceCommand("screencap returned no data".into()));
        }
        Ok(png)
    }

    async fn tap(&self, x: u32, y: u32) -> DroidClawResult<()> {
        self.shell(&["input", "tap", &x.to_string(), &y.to_string()]).await?;
        Ok(())
    }

    async fn swipe(&self, from: (u32, u32), to: (u32, u32), duration_ms: u32) -> DroidClawResult<()> {
        self.shell(&[
            "input",
            "swipe",
            &from.0.to_string(),
            &from.1.to_string(),
            &to.0.to_string(),
            &to.1.to_string(),
            &duration_ms.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn input_text(&self, text: &str) -> DroidClawResult<()> {
        if !text_input::is_typeable(text) {
            return Err(DroidClawError::DeviceCommand(
                "input text only supports printable ASCII".into(),
            ));
        }
        if text.is_empty() {
            return Ok(());
        }
        let escaped = text_input::escape_for_input(text);
        self.shell(&["input", "text", &escaped]).await?;
        Ok(())
    }

    async fn press_key(&self, key: KeyCode) -> DroidClawResult<()> {
        self.shell(&["input", "keyevent", &key.code().to_string()]).await?;
        Ok(())
    }

    async fn launch_app(&self, package: &str) -> DroidClawResult<()> {
        let out = self
            .shell(&[
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ])
            .await?;
        if out.contains("No activities found") || out.contains("monkey aborted") {
            return Err(DroidClawError::DeviceCommand(format!(
                "no launchable activity for package '{package}'"
            )));
        }
        Ok(())
    }

    async fn list_devices(&self) -> DroidClawResult<Vec<String>> {
        let out = self.run(&["devices"]).await?;
        Ok(parse_device_list(&String::from_utf8_lossy(&out)))
    }

    async fn screen_size(&self) -> DroidClawResult<(u32, u32)> {
        let out = self.shell(&["wm", "size"]).await?;
        parse_wm_size(&out)
            .ok_or_else(|| DroidClawError::DeviceCommand(format!("unexpected wm size output: {out}")))
    }

    async fn dump_ui_hierarchy(&self) -> DroidClawResult<String> {
        let out = self.run(&["exec-out", "uiautomator", "dump", "/dev/tty"]).await?;
        let text = String::from_utf8_lossy(&out);
        extract_hierarchy_xml(&text)
            .map(str::to_string)
            .ok_or_else(|| DroidClawError::DeviceCommand("uiautomator dump produced no hierarchy".into()))
    }
}
