//! # Error Module
//!
//! A single error type for the core. Per-bin problems never surface here;
//! they are counted in a [`crate::aggregate::FrameReport`] and skipped.

use thiserror::Error;

/// Errors returned by the pitch-mapping engine.
#[derive(Debug, Error)]
pub enum PitchMapError {
    /// The mapper was given a zero, negative or non-finite frequency.
    #[error("invalid frequency: {0} Hz (must be positive and finite)")]
    InvalidFrequency(f32),

    /// A frame could not be accepted as a whole (e.g. a bad sample rate).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// `start` was called on a session that is still active.
    #[error("session misuse: {0}")]
    SessionMisuse(String),

    /// The audio source could not be opened or went away.
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A note name such as `"A4"` or `"Bb-1"` could not be parsed.
    #[error("invalid note name: {0:?}")]
    InvalidNoteName(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PitchMapError>;
