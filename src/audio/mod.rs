//! # Audio Pipeline Module
//!
//! This module holds the realtime voice pipeline: binary transcoding, the
//! outbound capture path and the inbound playback path.
//!
//! ## Key Components:
//! - **Codec**: base64 transcoding and PCM16 ⇄ float conversion
//! - **Capture Path**: fixed-size blocks → PCM16 → transcoded payloads on a
//!   bounded outbound queue
//! - **Playback Path**: inbound payloads → audio frames → gapless scheduled
//!   playback against a monotonic timeline cursor
//!
//! ## Audio Format Requirements:
//! - **Outbound**: 16 kHz, 16-bit PCM, mono, little-endian
//! - **Inbound**: 24 kHz, 16-bit PCM, mono, little-endian
//! - **Block size**: 2048 samples per capture block

pub mod capture;   // Outbound capture path
pub mod codec;     // Transcoding and PCM conversion
pub mod playback;  // Inbound playback scheduling
