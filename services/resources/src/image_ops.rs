//! Raster derivatives: contain/cover resizes and the centred thumbnail crop.
//!
//! The geometry lives in pure functions ([`contain_dimensions`], [`cover_box`],
//! [`crop_box`]) so it can be tested without decoding anything. The generator
//! itself is synchronous and CPU bound; async callers run it on the blocking pool.

use crate::error::{ResourceError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Region of the source image kept by a crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Output size of an aspect-preserving resize into an optional box.
///
/// A missing axis is unconstrained. Upsizing is allowed.
pub fn contain_dimensions(
    source_width: u32,
    source_height: u32,
    box_width: Option<u32>,
    box_height: Option<u32>,
) -> (u32, u32) {
    let sw = source_width.max(1) as f64;
    let sh = source_height.max(1) as f64;

    let scale = match (box_width, box_height) {
        (Some(w), Some(h)) => (w as f64 / sw).min(h as f64 / sh),
        (Some(w), None) => w as f64 / sw,
        (None, Some(h)) => h as f64 / sh,
        (None, None) => 1.0,
    };

    let width = (sw * scale).round().max(1.0) as u32;
    let height = (sh * scale).round().max(1.0) as u32;
    (width, height)
}

/// Exact output box of a cover resize; a missing axis mirrors the given one
pub fn cover_box(box_width: Option<u32>, box_height: Option<u32>) -> Option<(u32, u32)> {
    match (box_width, box_height) {
        (Some(w), Some(h)) => Some((w, h)),
        (Some(side), None) | (None, Some(side)) => Some((side, side)),
        (None, None) => None,
    }
}

/// Centred crop box for a `target_width x target_height` thumbnail.
///
/// The scale comes from the shorter source axis, then shrinks if the box would
/// overflow the source. The box is always centred.
pub fn crop_box(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
) -> CropBox {
    let sw = source_width as f64;
    let sh = source_height as f64;
    let tw = target_width.max(1) as f64;
    let th = target_height.max(1) as f64;

    let mut scale = if sw < sh { sw / tw } else { sh / th };
    let mut crop_width = tw * scale;
    let mut crop_height = th * scale;

    if crop_width > sw {
        scale = sw / tw;
        crop_width = tw * scale;
        crop_height = th * scale;
    }

    if crop_height > sh {
        scale = sh / th;
        crop_width = tw * scale;
        crop_height = th * scale;
    }

    let width = (crop_width as u32).clamp(1, source_width.max(1));
    let height = (crop_height as u32).clamp(1, source_height.max(1));

    CropBox {
        x: source_width.saturating_sub(width) / 2,
        y: source_height.saturating_sub(height) / 2,
        width,
        height,
    }
}

/// Output format for a file extension, with or without the leading dot
pub fn format_for_extension(extension: &str) -> ImageFormat {
    ImageFormat::from_extension(extension.trim_start_matches('.')).unwrap_or(ImageFormat::Jpeg)
}

/// Resize and crop operations over encoded image bytes
#[derive(Debug, Clone, Copy)]
pub struct ImageDerivativeGenerator {
    filter: FilterType,
}

impl Default for ImageDerivativeGenerator {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImageDerivativeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| {
            ResourceError::DerivativeGeneration(format!("Unreadable source image: {e}"))
        })
    }

    /// Resize `bytes` into the box.
    ///
    /// `fit = false` keeps the aspect ratio and may leave one axis short of the
    /// box; `fit = true` scales and centre-crops to exactly the box.
    pub fn resize(
        &self,
        bytes: &[u8],
        width: Option<u32>,
        height: Option<u32>,
        fit: bool,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Vec<u8>> {
        let img = Self::decode(bytes)?;
        let (source_width, source_height) = img.dimensions();

        let resized = if fit {
            match cover_box(width, height) {
                Some((w, h)) => img.resize_to_fill(w, h, self.filter),
                None => img,
            }
        } else {
            let (w, h) = contain_dimensions(source_width, source_height, width, height);
            img.resize_exact(w, h, self.filter)
        };

        debug!(
            source_width,
            source_height,
            width = resized.width(),
            height = resized.height(),
            fit,
            "Image resized"
        );

        encode(&resized, format, quality)
    }

    /// Centred crop scaled to exactly `target_width x target_height`, as JPEG.
    ///
    /// The focal point is logged only; the crop is always centred.
    pub fn crop_thumbnail(
        &self,
        bytes: &[u8],
        target_width: u32,
        target_height: u32,
        center_x: f64,
        center_y: f64,
        quality: u8,
    ) -> Result<Vec<u8>> {
        if target_width == 0 || target_height == 0 {
            return Err(ResourceError::InvalidInput(format!(
                "Thumbnail size must be positive, got {target_width}x{target_height}"
            )));
        }

        let img = Self::decode(bytes)?;
        let (source_width, source_height) = img.dimensions();
        let crop = crop_box(source_width, source_height, target_width, target_height);

        debug!(
            source_width,
            source_height,
            crop_x = crop.x,
            crop_y = crop.y,
            crop_width = crop.width,
            crop_height = crop.height,
            center_x,
            center_y,
            "Cropping thumbnail"
        );

        let thumbnail = img
            .crop_imm(crop.x, crop.y, crop.width, crop.height)
            .resize_exact(target_width, target_height, self.filter);

        encode(&thumbnail, ImageFormat::Jpeg, quality)
    }

    /// Shrink to fit within `max_width x max_height`; `None` when already small enough
    pub fn fit_within(
        &self,
        bytes: &[u8],
        max_width: u32,
        max_height: u32,
        format: ImageFormat,
        quality: u8,
    ) -> Result<Option<Vec<u8>>> {
        let img = Self::decode(bytes)?;
        let (width, height) = img.dimensions();

        if width <= max_width && height <= max_height {
            return Ok(None);
        }

        let (w, h) = contain_dimensions(width, height, Some(max_width), Some(max_height));
        let resized = img.resize_exact(w, h, self.filter);
        encode(&resized, format, quality).map(Some)
    }
}

/// Run raster work on the blocking pool
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ResourceError::DerivativeGeneration(format!("Image task failed: {e}")))?
}

/// Encode in `format`; JPEG honours `quality` (clamped to 1..=100)
pub fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();

    if format == ImageFormat::Jpeg {
        let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        // JPEG has no alpha channel
        img.to_rgb8().write_with_encoder(encoder)?;
    } else {
        img.write_to(&mut Cursor::new(&mut buffer), format)?;
    }

    Ok(buffer)
}
