//! Error types for the presenter
//!
//! This module defines the crate error type. We use thiserror for convenient
//! error type definitions and anyhow at the binary boundary. Conditions that
//! are expected on every callback ("no slot available", "no sample ready",
//! "needs more input") are not errors at all; they are returned as outcome
//! enums by the queue and the mixer contract.

use crate::decoder::MixerError;
use crate::renderer::{DeviceError, ErrorClass};
use thiserror::Error;

/// Main error type for the presenter
#[derive(Error, Debug)]
pub enum PresenterError {
    /// Render device errors that were not resolved by a fallback
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Mixer errors that terminate the current processing pass
    #[error("Mixer error: {0}")]
    Mixer(#[from] MixerError),

    /// No output media type has been negotiated yet
    #[error("Media type not set")]
    MediaTypeNotSet,

    /// Proposed media type was rejected
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The upstream stream changed format and must be renegotiated
    #[error("Stream format changed")]
    StreamChanged,

    /// The software device failed too, nothing left to fall back to
    #[error("Software fallback failed: {0}")]
    FallbackExhausted(String),

    /// Clock or timer errors
    #[error("Clock error: {0}")]
    Clock(String),

    /// Operation not valid in the current presenter state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested playback rate not supported
    #[error("Unsupported rate: {0}")]
    UnsupportedRate(f32),

    /// The presenter has been shut down
    #[error("Presenter is shut down")]
    Shutdown,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used to decide retry vs. propagate at the call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Try again on the next callback
    Transient,

    /// Resolved locally by renegotiation or device fallback
    Recoverable,

    /// Propagate to the host
    Fatal,
}

impl PresenterError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PresenterError::Device(err) => {
                match err.classify() {
                    ErrorClass::Transient => ErrorKind::Transient,
                    ErrorClass::SoftwareFallback => ErrorKind::Recoverable,
                    ErrorClass::Fatal => ErrorKind::Fatal,
                }
            }
            PresenterError::Mixer(MixerError::NeedMoreInput) => ErrorKind::Transient,
            PresenterError::Mixer(MixerError::StreamChanged)
            | PresenterError::StreamChanged
            | PresenterError::MediaTypeNotSet => ErrorKind::Recoverable,
            PresenterError::Mixer(MixerError::Device(err)) => match err.classify() {
                ErrorClass::Transient => ErrorKind::Transient,
                _ => ErrorKind::Recoverable,
            },
            _ => ErrorKind::Fatal,
        }
    }

    /// Whether the caller should simply retry on the next callback
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Convenience type alias for Results in the presenter
pub type Result<T> = std::result::Result<T, PresenterError>;

/// Extension trait for converting other errors to PresenterError
pub trait IntoPresenterError<T> {
    /// Convert this error into a PresenterError with the given context
    fn config_err(self, context: &str) -> Result<T>;
    fn clock_err(self, context: &str) -> Result<T>;
    fn internal_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPresenterError<T> for std::result::Result<T, E> {
    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PresenterError::Config(format!("{}: {}", context, e)))
    }

    fn clock_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PresenterError::Clock(format!("{}: {}", context, e)))
    }

    fn internal_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PresenterError::Internal(format!("{}: {}", context, e)))
    }
}
