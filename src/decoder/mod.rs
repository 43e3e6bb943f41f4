//! Decoder module for the presenter
//!
//! This module defines the contract with the upstream mixer: the presenter
//! hands the mixer an empty frame buffer and the mixer fills it with the next
//! decoded, mixed frame and its presentation time. Failures are classified so
//! the presenter's processing loop knows whether to wait for input,
//! renegotiate the format, or fall back to software rendering.

mod media_type;

pub use media_type::{MediaType, PixelFormat};

use crate::queue::VideoSample;
use crate::renderer::DeviceError;
use thiserror::Error;

/// Errors the mixer reports from `process_output`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MixerError {
    /// The mixer needs more input before it can produce a frame
    #[error("mixer needs more input")]
    NeedMoreInput,

    /// The input format changed; the output type must be renegotiated
    #[error("stream format changed")]
    StreamChanged,

    /// The render device failed while the mixer was writing into the buffer
    #[error("device failure during mixing: {0}")]
    Device(#[from] DeviceError),

    /// Any other failure
    #[error("mixer failed: {0}")]
    Failed(String),
}

/// Mixer trait defining the upstream source of decoded frames
pub trait Mixer: Send + Sync {
    /// Output type the mixer proposes for the current stream
    ///
    /// # Returns
    ///
    /// Returns the proposed type, or None if the stream has no type yet
    fn output_type(&self) -> Option<MediaType>;

    /// Produce the next frame into `target`
    ///
    /// The mixer writes pixels into `target.surface_mut()` and sets the
    /// sample time and duration.
    ///
    /// # Arguments
    ///
    /// * `target` - Empty buffer allocated for the negotiated type
    fn process_output(&self, target: &mut VideoSample) -> std::result::Result<(), MixerError>;

    /// Drop any buffered input
    fn flush(&self) {}
}
