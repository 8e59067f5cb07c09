use base64::Engine as _;

use crate::errors::{DroidClawError, DroidClawResult};

/// One captured frame at device resolution. Immutable once decoded.
#[derive(Debug, Clone)]
pub struct Screenshot {
    image: image::RgbaImage,
}

impl Screenshot {
    /// Decode PNG/JPEG bytes as returned by `screencap -p`.
    pub fn from_bytes(bytes: &[u8]) -> DroidClawResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| DroidClawError::Perception(format!("decode screenshot: {e}")))?;
        Ok(Self { image: img.to_rgba8() })
    }

    pub fn from_image(image: image::RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Downscale so the longest edge is at most `max_edge`, keeping aspect ratio.
    /// Frames already within the limit are returned as-is.
    pub fn downscaled(&self, max_edge: u32) -> image::RgbaImage {
        let (w, h) = self.dimensions();
        let (nw, nh) = fit_within(w, h, max_edge);
        if (nw, nh) == (w, h) {
            return self.image.clone();
        }
        image::imageops::resize(&self.image, nw, nh, image::imageops::FilterType::Lanczos3)
    }
}

/// Target size for a `w × h` image whose longest edge must not exceed `max_edge`.
pub fn fit_within(w: u32, h: u32, max_edge: u32) -> (u32, u32) {
    if w <= max_edge && h <= max_edge {
        return (w, h);
    }
    let scale = f64::from(max_edge) / f64::from(w.max(h));
    let nw = ((f64::from(w) * scale) as u32).max(1);
    let nh = ((f64::from(h) * scale) as u32).max(1);
    (nw, nh)
}

pub fn encode_png(img: &image::RgbaImage) -> DroidClawResult<Vec<u8>> {
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| DroidClawError::Perception(format!("PNG encode: {e}")))?;
    Ok(out)
}

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// `data:image/png;base64,…` URL for vision chat APIs.
pub fn png_data_url(png: &[u8]) -> String {
    format!(
        "{PNG_DATA_URL_PREFIX}{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}
