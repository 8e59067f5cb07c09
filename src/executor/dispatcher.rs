use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::agent_engine::action::Action;
use crate::config::DeviceConfig;
use crate::errors::{DroidClawError, DroidClawResult};
use crate::executor::backend::{DeviceBackend, KeyCode};
use crate::perception::som_grid::{resolve_cell, CellRef};
use crate::perception::types::Observation;

/// Outcome of one device action as reported back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub detail: String,
}

impl ExecutionResult {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Turns validated actions into device calls.
pub struct Executor {
    device: Arc<dyn DeviceBackend>,
    swipe_duration_ms: u32,
    tap_sequence_delay_ms: u32,
}

impl Executor {
    pub fn new(device: Arc<dyn DeviceBackend>, cfg: &DeviceConfig) -> Self {
        Self {
            device,
            swipe_duration_ms: cfg.swipe_duration_ms,
            tap_sequence_delay_ms: cfg.tap_sequence_delay_ms,
        }
    }

    /// Execute `action` against the screen described by `obs`.
    ///
    /// Returns `Err` for cells outside the grid (nothing is sent to the device)
    /// and for an unreachable device. A command the device rejects comes back
    /// as `Ok` with `success == false`.
    pub async fn execute(&self, action: &Action, obs: &Observation) -> DroidClawResult<ExecutionResult> {
        let resolve = |cell: &CellRef| resolve_cell(cell, obs.device_size, obs.grid);

        let outcome = match action {
            Action::Tap { cell } => {
                let (x, y) = resolve(cell)?;
                self.device.tap(x, y).await.map(|_| format!("Tapped {cell} at ({x}, {y})"))
            }
            Action::TapSequence { cells, delay_ms } => {
                let points = cells
                    .iter()
                    .map(|c| resolve(c).map(|p| (*c, p)))
                    .collect::<DroidClawResult<Vec<_>>>()?;
                let delay = Duration::from_millis(u64::from(delay_ms.unwrap_or(self.tap_sequence_delay_ms)));
                self.tap_sequence(&points, delay).await
            }
            Action::Swipe { start, end, duration_ms } => {
                let from = resolve(start)?;
                let to = resolve(end)?;
                let duration = duration_ms.unwrap_or(self.swipe_duration_ms);
                self.device
                    .swipe(from, to, duration)
                    .await
                    .map(|_| format!("Swiped from {start} to {end} over {duration}ms"))
            }
            Action::InputText { text } => self
                .device
                .input_text(text)
                .await
                .map(|_| format!("Typed {} characters", text.chars().count())),
            Action::PressHome => self.press(KeyCode::Home, "home").await,
            Action::PressBack => self.press(KeyCode::Back, "back").await,
            Action::PressEnter => self.press(KeyCode::Enter, "enter").await,
            Action::PressRecentApps => self.press(KeyCode::AppSwitch, "recent apps").await,
            Action::LaunchApp { package } => self
                .device
                .launch_app(package)
                .await
                .map(|_| format!("Launched {package}")),
            Action::Wait { seconds } => match Duration::try_from_secs_f64(*seconds) {
                Ok(d) => {
                    tokio::time::sleep(d).await;
                    Ok(format!("Waited {seconds}s"))
                }
                Err(e) => Err(DroidClawError::DeviceCommand(format!("cannot wait {seconds}s: {e}"))),
            },
            Action::TaskComplete { .. } | Action::TaskImpossible { .. } => {
                return Err(DroidClawError::Agent(format!(
                    "terminal action '{}' must not be executed",
                    action.tool_name()
                )));
            }
        };

        match outcome {
            Ok(detail) => {
                tracing::info!(tool = action.tool_name(), %detail, "action executed");
                Ok(ExecutionResult::ok(detail))
            }
            Err(e @ DroidClawError::DeviceUnavailable(_)) => Err(e),
            Err(e) => {
                tracing::warn!(tool = action.tool_name(), error = %e, "action failed");
                Ok(ExecutionResult::failed(e.to_string()))
            }
        }
    }

    async fn press(&self, key: KeyCode, label: &str) -> DroidClawResult<String> {
        self.device.press_key(key).await?;
        Ok(format!("Pressed {label}"))
    }

    async fn tap_sequence(&self, points: &[(CellRef, (u32, u32))], delay: Duration) -> DroidClawResult<String> {
        for (i, (_, (x, y))) in points.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            self.device.tap(*x, *y).await?;
        }
        let labels: Vec<String> = points.iter().map(|(c, _)| c.to_string()).collect();
        Ok(format!("Tapped {} cells: {}", points.len(), labels.join(", ")))
    }
}
