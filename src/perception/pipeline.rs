//! Perception pipeline: raw device frame → gridded, downscaled image for the model.
//!
//! 1. Downscale so the longest edge fits `grid.max_edge`.
//! 2. Size the grid from the downscaled image (`grid.cell_size` cells).
//! 3. Overlay labeled grid lines on a copy.
//! 4. Encode as a PNG data URL.
//! 5. Optionally summarise the uiautomator dump in grid-cell terms.
use crate::config::GridConfig;
use crate::errors::{DroidClawError, DroidClawResult};
use crate::executor::backend::DeviceBackend;
use crate::perception::screenshot::{encode_png, png_data_url, Screenshot};
use crate::perception::som_grid::{overlay, GridSpec};
use crate::perception::types::Observation;
use crate::perception::ui_hierarchy;

/// Capture a frame from `device` and build the observation for it.
///
/// A frame that does not decode means the backend is handing back something
/// other than a screenshot (adb writing an error to stdout, a locked-down
/// device), so it is reported as `DeviceUnavailable`. A failed UI dump is
/// only logged unless the device itself is gone.
pub async fn capture(
    device: &dyn DeviceBackend,
    grid_cfg: &GridConfig,
    include_ui_elements: bool,
) -> DroidClawResult<Observation> {
    let bytes = device.capture_screen().await?;
    let shot = Screenshot::from_bytes(&bytes).map_err(|e| {
        DroidClawError::DeviceUnavailable(format!(
            "screen capture returned {} bytes that are not an image ({e})",
            bytes.len()
        ))
    })?;

    let ui_dump = if include_ui_elements {
        match device.dump_ui_hierarchy().await {
            Ok(xml) => Some(xml),
            Err(e @ DroidClawError::DeviceUnavailable(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "UI hierarchy dump failed, continuing without it");
                None
            }
        }
    } else {
        None
    };

    observe(&shot, grid_cfg, ui_dump.as_deref())
}

pub fn observe(
    shot: &Screenshot,
    grid_cfg: &GridConfig,
    ui_dump: Option<&str>,
) -> DroidClawResult<Observation> {
    let scaled = shot.downscaled(grid_cfg.max_edge);
    let image_size = scaled.dimensions();
    let grid = GridSpec::for_image(image_size.0, image_size.1, grid_cfg.cell_size);

    let gridded = overlay(&scaled, grid);
    let png = encode_png(&gridded)?;

    let ui_elements = ui_dump.map(|xml| {
        let elements = ui_hierarchy::parse_ui_elements(xml);
        ui_hierarchy::summarize(&elements, shot.dimensions(), grid)
    });

    tracing::debug!(
        device = %format!("{}x{}", shot.width(), shot.height()),
        scaled = %format!("{}x{}", image_size.0, image_size.1),
        grid = %format!("{}x{}", grid.columns, grid.rows),
        png_bytes = png.len(),
        "observation built"
    );

    Ok(Observation {
        device_size: shot.dimensions(),
        image_size,
        grid,
        image_data_url: png_data_url(&png),
        ui_elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_frame_gets_9x20_grid() {
        let shot = Screenshot::from_image(image::RgbaImage::new(1080, 2400));
        let obs = observe(&shot, &GridConfig::default(), None).unwrap();
        assert_eq!(obs.device_size, (1080, 2400));
        assert_eq!(obs.image_size, (360, 800));
        assert_eq!(obs.grid, GridSpec::new(9, 20));
        assert!(obs.image_data_url.starts_with("data:image/png;base64,"));
        assert!(obs.ui_elements.is_none());
    }

    #[test]
    fn test_small_frame_not_upscaled() {
        let shot = Screenshot::from_image(image::RgbaImage::new(1040, 800));
        let cfg = GridConfig {
            cell_size: 40,
            max_edge: 1040,
        };
        let obs = observe(&shot, &cfg, None).unwrap();
        assert_eq!(obs.image_size, (1040, 800));
        assert_eq!(obs.grid, GridSpec::new(26, 20));
    }

    #[test]
    fn test_ui_dump_summarised() {
        let shot = Screenshot::from_image(image::RgbaImage::new(1080, 2400));
        let xml = r#"<node text="OK" class="android.widget.Button" clickable="true" bounds="[0,0][120,120]" />"#;
        let obs = observe(&shot, &GridConfig::default(), Some(xml)).unwrap();
        assert_eq!(
            obs.ui_elements.as_deref(),
            Some(r#"{ [Button] "OK" position="A1" }"#)
        );
    }
}
