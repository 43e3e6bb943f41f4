//! Frame buffer surfaces
//!
//! A surface is the pixel storage behind one queue slot. Surfaces remember the
//! device they were allocated on so the compositor side can tell when a
//! conversion to its own device is needed.

use crate::decoder::{MediaType, PixelFormat};
use crate::renderer::DeviceId;

/// Luma value for black in limited-range YUV
const NV12_BLACK_Y: u8 = 16;

/// Chroma value for neutral color
const NV12_NEUTRAL_UV: u8 = 128;

/// Frame buffer resident on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSurface {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Pixel layout
    pub format: PixelFormat,

    /// Row pitch of the first plane in bytes
    pub stride: usize,

    /// Device that owns this buffer
    pub device: DeviceId,

    /// Pixel storage
    pub pixels: Vec<u8>,
}

impl VideoSurface {
    /// Allocate a black surface for a media type
    pub fn new(media_type: &MediaType, device: DeviceId) -> Self {
        Self::black(media_type.width, media_type.height, media_type.format, device)
    }

    /// Allocate a black surface of the given size
    pub fn black(width: u32, height: u32, format: PixelFormat, device: DeviceId) -> Self {
        let stride = format.stride(width);
        let size = format.buffer_size(width, height);

        let pixels = match format {
            PixelFormat::Argb32 => {
                let mut pixels = vec![0u8; size];
                // Opaque black: alpha is the fourth byte of every BGRA pixel
                for pixel in pixels.chunks_exact_mut(4) {
                    pixel[3] = 0xff;
                }
                pixels
            }
            PixelFormat::Rgb32 => vec![0u8; size],
            PixelFormat::Nv12 => {
                let luma = stride * height as usize;
                let mut pixels = vec![NV12_NEUTRAL_UV; size];
                pixels[..luma].fill(NV12_BLACK_Y);
                pixels
            }
        };

        Self {
            width,
            height,
            format,
            stride,
            device,
            pixels,
        }
    }

    /// Whether this buffer can hold frames of the given media type
    pub fn matches(&self, media_type: &MediaType) -> bool {
        self.width == media_type.width
            && self.height == media_type.height
            && self.format == media_type.format
    }

    /// Fill the surface with a solid color
    ///
    /// RGB formats take the color verbatim; NV12 only writes the luma derived
    /// from the color.
    pub fn fill(&mut self, rgb: [u8; 3]) {
        match self.format {
            PixelFormat::Argb32 | PixelFormat::Rgb32 => {
                for pixel in self.pixels.chunks_exact_mut(4) {
                    pixel[0] = rgb[2];
                    pixel[1] = rgb[1];
                    pixel[2] = rgb[0];
                    pixel[3] = 0xff;
                }
            }
            PixelFormat::Nv12 => {
                let luma_len = self.stride * self.height as usize;
                let y = (16.0
                    + 0.257 * rgb[0] as f32
                    + 0.504 * rgb[1] as f32
                    + 0.098 * rgb[2] as f32) as u8;
                self.pixels[..luma_len].fill(y);
            }
        }
    }

    /// Size of the pixel buffer in bytes
    pub fn size_bytes(&self) -> usize {
        self.pixels.len()
    }

    /// Whether every pixel is black
    pub fn is_black(&self) -> bool {
        match self.format {
            PixelFormat::Argb32 | PixelFormat::Rgb32 => self
                .pixels
                .chunks_exact(4)
                .all(|p| p[0] == 0 && p[1] == 0 && p[2] == 0),
            PixelFormat::Nv12 => {
                let luma_len = self.stride * self.height as usize;
                self.pixels[..luma_len].iter().all(|&y| y == NV12_BLACK_Y)
            }
        }
    }
}
