//! Frame types and capture validation

use crate::config::CameraSettings;
use chrono::{DateTime, Utc};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Largest width or height any supported sensor delivers
pub const MAX_DIMENSION: u32 = 16_384;

/// Pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Gray8,
    /// Encoded still; decoded to RGB during validation
    Jpeg,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Jpeg => None,
        }
    }
}

/// Frame as handed over by a driver, before validation
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub sequence: u32,
}

/// Hardware failure signatures observed on capture
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameFault {
    #[error("driver returned a null buffer")]
    NullBuffer,

    #[error("driver returned a zero-size buffer")]
    ZeroSize,

    #[error("implausible frame: {0}")]
    Implausible(String),
}

/// Validated frame shared by every ROI captured under the same settings
#[derive(Debug, Clone)]
pub struct CapturedImage {
    id: Uuid,
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Arc<[u8]>,
    settings: CameraSettings,
    sequence: u32,
    captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Always a raw format (`Rgb24` or `Gray8`)
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Settings the frame was captured under
    pub fn settings(&self) -> CameraSettings {
        self.settings
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Whether both references point at the same captured frame
    pub fn same_frame(&self, other: &CapturedImage) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Encode as PNG for transmission
    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let color = match self.format {
            PixelFormat::Gray8 => ExtendedColorType::L8,
            _ => ExtendedColorType::Rgb8,
        };
        let mut png = Vec::new();
        PngEncoder::new(&mut png).write_image(&self.data, self.width, self.height, color)?;
        Ok(png)
    }
}

/// Turn whatever the driver produced into a trusted image.
///
/// Null buffers, empty buffers and frames whose size does not match their
/// declared geometry are all reported as faults instead of reaching the
/// inspection engine.
pub fn validate_frame(
    raw: Option<RawFrame>,
    settings: CameraSettings,
) -> Result<CapturedImage, FrameFault> {
    let raw = raw.ok_or(FrameFault::NullBuffer)?;
    if raw.data.is_empty() {
        return Err(FrameFault::ZeroSize);
    }

    let (data, width, height, format) = match raw.format {
        PixelFormat::Jpeg => {
            let decoded = image::load_from_memory_with_format(&raw.data, ImageFormat::Jpeg)
                .map_err(|e| FrameFault::Implausible(format!("undecodable JPEG: {}", e)))?;
            let rgb = decoded.to_rgb8();
            let (w, h) = rgb.dimensions();
            (rgb.into_raw(), w, h, PixelFormat::Rgb24)
        }
        format => (raw.data, raw.width, raw.height, format),
    };

    check_geometry(data.len(), width, height, format)?;

    Ok(CapturedImage {
        id: Uuid::new_v4(),
        width,
        height,
        format,
        data: Arc::from(data),
        settings,
        sequence: raw.sequence,
        captured_at: Utc::now(),
    })
}

fn check_geometry(
    len: usize,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<(), FrameFault> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(FrameFault::Implausible(format!(
            "dimensions {}x{}",
            width, height
        )));
    }
    let bpp = format
        .bytes_per_pixel()
        .ok_or_else(|| FrameFault::Implausible(format!("unexpected format {:?}", format)))?;
    let expected = width as usize * height as usize * bpp;
    if len != expected {
        return Err(FrameFault::Implausible(format!(
            "{} bytes for {}x{} {:?} (expected {})",
            len, width, height, format, expected
        )));
    }
    Ok(())
}

/// Drop row padding from a strided buffer.
///
/// The buffer is returned unchanged when it has no padding, when the stride
/// is narrower than a row, or when it is too short for `height` rows. Frame
/// validation then rejects anything that does not match the geometry.
#[cfg_attr(not(feature = "gstreamer"), allow(dead_code))]
pub(crate) fn pack_rows(src: &[u8], stride: usize, row: usize, height: usize) -> Vec<u8> {
    let fits = stride
        .checked_mul(height)
        .map_or(false, |needed| src.len() >= needed);
    if stride <= row || !fits {
        return src.to_vec();
    }
    src.chunks(stride)
        .take(height)
        .flat_map(|line| &line[..row])
        .copied()
        .collect()
}
