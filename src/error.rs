//! # Error Handling
//!
//! This module defines the error taxonomy for the voice pipeline and how
//! errors from lower-level crates are converted into it.
//!
//! ## Error Categories:
//! - **Acquisition**: capture source or credential could not be acquired at
//!   session start (fatal to `start()`, never retried)
//! - **Channel**: transport-level failure on the realtime channel during an
//!   active session (triggers full teardown, surfaced as "connection lost")
//! - **MalformedPayload**: an inbound frame that cannot be decoded (the
//!   session drops the frame and continues)
//! - **InvalidState**: an operation attempted from the wrong session state
//! - **Config**: configuration loading or validation problems
//!
//! ## Propagation policy:
//! Startup-path errors propagate to the caller, which is responsible for
//! displaying them. Teardown-path errors are caught and logged locally;
//! teardown never returns an error.

use std::fmt;

/// Errors produced by the voice pipeline.
///
/// ## Rust Concepts:
/// - **enum**: A type that can be one of several variants
/// - **String**: Each variant holds a human-readable detail message
/// - **#[derive(Debug)]**: Automatically implements debug printing
#[derive(Debug)]
pub enum VoiceError {
    /// Capture source denied/unavailable, or missing API credential
    Acquisition(String),

    /// Transport failure on the realtime channel
    Channel(String),

    /// Inbound payload that could not be decoded
    MalformedPayload(String),

    /// Operation attempted from an incompatible session state
    InvalidState(String),

    /// Configuration loading or validation failure
    Config(String),
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::Acquisition(msg) => write!(f, "Acquisition failure: {}", msg),
            VoiceError::Channel(msg) => write!(f, "Channel error: {}", msg),
            VoiceError::MalformedPayload(msg) => write!(f, "Malformed payload: {}", msg),
            VoiceError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            VoiceError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for VoiceError {}

impl VoiceError {
    /// Whether this error is fatal to the session.
    ///
    /// ## Fatal vs. recoverable:
    /// - Acquisition and Channel errors end the session
    /// - MalformedPayload only costs the offending frame
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VoiceError::MalformedPayload(_))
    }
}

/// Automatic conversion from JSON errors.
///
/// ## Why MalformedPayload:
/// JSON failures in this crate only occur while decoding inbound channel
/// messages, so they map to the frame-drop category rather than a fatal one.
impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::MalformedPayload(format!("JSON parsing error: {}", err))
    }
}

/// Automatic conversion from base64 decode errors.
impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::MalformedPayload(format!("Base64 decoding error: {}", err))
    }
}

/// Automatic conversion from configuration errors.
impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

/// Automatic conversion from I/O errors.
///
/// ## Why Acquisition:
/// File and device I/O only happens while acquiring or releasing the capture
/// source and the playback sink, which is the acquisition path.
impl From<std::io::Error> for VoiceError {
    fn from(err: std::io::Error) -> Self {
        VoiceError::Acquisition(err.to_string())
    }
}

/// Automatic conversion from websocket transport errors.
impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Channel(err.to_string())
    }
}

/// Type alias for Results that use the pipeline's error type.
pub type VoiceResult<T> = Result<T, VoiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn test_display_messages() {
        let err = VoiceError::Acquisition("microphone denied".to_string());
        assert_eq!(err.to_string(), "Acquisition failure: microphone denied");

        let err = VoiceError::Channel("connection reset".to_string());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_fatality() {
        assert!(VoiceError::Channel("boom".to_string()).is_fatal());
        assert!(VoiceError::Acquisition("denied".to_string()).is_fatal());
        assert!(!VoiceError::MalformedPayload("bad frame".to_string()).is_fatal());
    }

    #[test]
    fn test_base64_conversion() {
        let decode_err = base64::engine::general_purpose::STANDARD
            .decode("not!valid!")
            .unwrap_err();
        let err: VoiceError = decode_err.into();
        assert!(matches!(err, VoiceError::MalformedPayload(_)));
    }
}
