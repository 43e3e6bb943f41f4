//! Output media types negotiated with the mixer

use serde::{Deserialize, Serialize};
use crate::utils::error::{PresenterError, Result};
use crate::utils::TICKS_PER_SECOND;

/// Largest frame dimension accepted from the mixer
const MAX_DIMENSION: u32 = 16_384;

/// Pixel formats the presenter can allocate buffers for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit BGRA with alpha
    Argb32,

    /// 32-bit BGRX, alpha ignored
    Rgb32,

    /// Y plane followed by interleaved half-resolution UV plane
    Nv12,
}

impl PixelFormat {
    /// Row pitch of the first plane in bytes
    pub fn stride(&self, width: u32) -> usize {
        match self {
            PixelFormat::Argb32 | PixelFormat::Rgb32 => width as usize * 4,
            PixelFormat::Nv12 => width as usize,
        }
    }

    /// Total buffer size in bytes
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let luma = self.stride(width) * height as usize;
        match self {
            PixelFormat::Argb32 | PixelFormat::Rgb32 => luma,
            PixelFormat::Nv12 => luma + luma / 2,
        }
    }
}

/// Negotiated output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Pixel layout
    pub format: PixelFormat,

    /// Frame rate as numerator / denominator
    pub frame_rate: (u32, u32),
}

impl MediaType {
    /// Create a media type
    pub fn new(width: u32, height: u32, format: PixelFormat, frame_rate: (u32, u32)) -> Self {
        Self {
            width,
            height,
            format,
            frame_rate,
        }
    }

    /// Check that buffers can be allocated for this type
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PresenterError::UnsupportedMediaType(format!(
                "{}x{} has a zero dimension",
                self.width, self.height
            )));
        }

        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(PresenterError::UnsupportedMediaType(format!(
                "{}x{} exceeds {}",
                self.width, self.height, MAX_DIMENSION
            )));
        }

        if self.format == PixelFormat::Nv12 && (self.width % 2 != 0 || self.height % 2 != 0) {
            return Err(PresenterError::UnsupportedMediaType(
                "NV12 requires even dimensions".to_string(),
            ));
        }

        if self.frame_rate.1 == 0 {
            return Err(PresenterError::UnsupportedMediaType(
                "frame rate denominator is zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Duration of one frame in sample-time ticks, if the rate is known
    pub fn frame_duration(&self) -> Option<i64> {
        let (num, den) = self.frame_rate;
        if num == 0 || den == 0 {
            return None;
        }
        Some(TICKS_PER_SECOND * den as i64 / num as i64)
    }
}
