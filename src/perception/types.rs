use serde::{Deserialize, Serialize};

use crate::perception::som_grid::GridSpec;

/// Everything the loop knows about the screen for one iteration.
///
/// `device_size` is the raw frame resolution that taps are issued in;
/// `image_size` is the downscaled, gridded picture shown to the model.
/// Both are split by the same `grid`.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub device_size: (u32, u32),
    pub image_size: (u32, u32),
    pub grid: GridSpec,
    /// Gridded PNG as a `data:` URL.
    #[serde(skip_serializing)]
    pub image_data_url: String,
    /// Optional uiautomator element summary, one element per line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_elements: Option<String>,
}

/// A clickable or scrollable node from the uiautomator dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiElement {
    pub class_name: String,
    pub text: String,
    pub content_desc: String,
    pub resource_id: String,
    pub clickable: bool,
    pub scrollable: bool,
    /// Device-pixel bounds `[x1, y1, x2, y2]`.
    pub bounds: [u32; 4],
}

impl UiElement {
    pub fn center(&self) -> (u32, u32) {
        let [x1, y1, x2, y2] = self.bounds;
        (midpoint(x1, x2), midpoint(y1, y2))
    }
}

fn midpoint(a: u32, b: u32) -> u32 {
    // Never larger than max(a, b), so it always fits back into u32.
    ((u64::from(a) + u64::from(b)) / 2) as u32
}
