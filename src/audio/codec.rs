//! # Codec Utilities
//!
//! Binary transcoding between raw PCM bytes and their text-safe wire
//! representation, and conversion between 16-bit PCM and normalized float
//! audio buffers.
//!
//! ## Conversions:
//! - **Transcoding**: raw bytes ⇄ base64, tagged with an `audio/pcm;rate=<n>`
//!   MIME descriptor. Lossless and total in the encode direction; decoding
//!   fails with `MalformedPayload` on invalid input.
//! - **PCM16 → float**: interleaved little-endian i16 samples are
//!   de-interleaved per channel and normalized to [-1.0, 1.0) by /32768.
//! - **Float → PCM16**: scaled by 32768, clamped, truncated toward zero.

use crate::error::{VoiceError, VoiceResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// A text-safe encoding of raw PCM bytes, as exchanged with the remote
/// endpoint.
///
/// Exists only at the channel boundary; it is never mutated and is discarded
/// after decode or send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodedPayload {
    /// Base64-encoded PCM bytes
    pub data: String,

    /// MIME-like descriptor, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// A fixed-length block of normalized audio samples at a declared sample
/// rate and channel count. Immutable once created.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioFrame {
    /// Create a frame from per-channel sample data.
    ///
    /// Every channel must have the same length; mono input is the common
    /// case throughout this pipeline.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        debug_assert!(!channels.is_empty());
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self {
            sample_rate,
            channels,
        }
    }

    /// Declared sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples in a single channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Number of sample frames (samples per channel).
    pub fn len(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether the frame carries no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Playback duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }
}

/// Encode raw PCM bytes into a transcoded payload tagged with the given
/// sample rate. Total and lossless for any byte sequence.
pub fn encode_from_bytes(bytes: &[u8], sample_rate: u32) -> TranscodedPayload {
    TranscodedPayload {
        data: STANDARD.encode(bytes),
        mime_type: format!("audio/pcm;rate={}", sample_rate),
    }
}

/// Reverse the text-safe encoding back into raw PCM bytes.
///
/// ## Errors:
/// Returns `MalformedPayload` if the payload data is not valid base64.
pub fn decode_to_bytes(payload: &TranscodedPayload) -> VoiceResult<Vec<u8>> {
    STANDARD
        .decode(&payload.data)
        .map_err(|e| VoiceError::MalformedPayload(format!("invalid base64 payload: {}", e)))
}

/// Reinterpret raw bytes as interleaved little-endian 16-bit PCM and build a
/// normalized audio frame.
///
/// ## Behavior:
/// - Frame count = byte length / 2 / channels
/// - Any trailing partial sample (odd byte, or an incomplete final
///   interleave group) is truncated
/// - Each sample is normalized to [-1.0, 1.0) by dividing by 32768
pub fn pcm16_to_frame(bytes: &[u8], sample_rate: u32, channel_count: usize) -> AudioFrame {
    let frames = bytes.len() / 2 / channel_count;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];

    let mut cursor = Cursor::new(bytes);
    'outer: for _ in 0..frames {
        for channel in channels.iter_mut() {
            match cursor.read_i16::<LittleEndian>() {
                Ok(sample) => channel.push(sample as f32 / 32768.0),
                Err(_) => break 'outer,
            }
        }
    }

    AudioFrame::new(sample_rate, channels)
}

/// Quantize normalized float samples to little-endian 16-bit PCM bytes.
///
/// ## Quantization:
/// Samples are scaled by 32768, clamped to the i16 range and truncated
/// toward zero rather than rounded. Truncation matches the behavior this
/// pipeline interoperates with; see DESIGN.md.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = sample * 32768.0;
        let quantized = scaled.clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcode_round_trip() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0u8],
            vec![0u8, 255, 128, 7],
            (0..=255u8).collect(),
        ];

        for bytes in cases {
            let payload = encode_from_bytes(&bytes, 16000);
            assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
            assert_eq!(decode_to_bytes(&payload).unwrap(), bytes);
        }
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let payload = TranscodedPayload {
            data: "not valid base64!!!".to_string(),
            mime_type: "audio/pcm;rate=24000".to_string(),
        };
        let err = decode_to_bytes(&payload).unwrap_err();
        assert!(matches!(err, VoiceError::MalformedPayload(_)));
    }

    #[test]
    fn test_pcm16_sample_count_and_range() {
        // 8 samples of a known pattern, mono
        let samples: Vec<i16> = vec![0, 16384, -16384, 32767, -32768, 1, -1, 100];
        let mut bytes = Vec::new();
        for s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        let frame = pcm16_to_frame(&bytes, 24000, 1);
        assert_eq!(frame.len(), bytes.len() / 2);
        assert_eq!(frame.channel_count(), 1);
        for &sample in frame.channel(0) {
            assert!((-1.0..1.0).contains(&sample));
        }
        assert_eq!(frame.channel(0)[0], 0.0);
        assert_eq!(frame.channel(0)[1], 0.5);
        assert_eq!(frame.channel(0)[4], -1.0);
    }

    #[test]
    fn test_pcm16_truncates_partial_sample() {
        // 5 bytes = 2 complete samples + 1 trailing byte
        let bytes = vec![0u8, 0, 0, 64, 9];
        let frame = pcm16_to_frame(&bytes, 24000, 1);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_pcm16_deinterleaves_stereo() {
        // L=100, R=-100, L=200, R=-200
        let samples: Vec<i16> = vec![100, -100, 200, -200];
        let mut bytes = Vec::new();
        for s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        let frame = pcm16_to_frame(&bytes, 24000, 2);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.channel_count(), 2);
        assert!(frame.channel(0)[0] > 0.0 && frame.channel(0)[1] > 0.0);
        assert!(frame.channel(1)[0] < 0.0 && frame.channel(1)[1] < 0.0);
    }

    #[test]
    fn test_quantization_clamps_out_of_range() {
        let bytes = f32_to_pcm16(&[1.5, -1.5]);
        assert_eq!(bytes, vec![255, 127, 0, 128]); // 32767, -32768 LE
    }

    #[test]
    fn test_pcm_conversion_accuracy() {
        let pcm: Vec<i16> = vec![0, 16384, -16384, 32767, -32768];
        let mut bytes = Vec::new();
        for s in &pcm {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        let frame = pcm16_to_frame(&bytes, 16000, 1);
        let back = f32_to_pcm16(frame.channel(0));

        // Quantization error after a round trip stays within one step
        for (i, chunk) in back.chunks_exact(2).enumerate() {
            let restored = i16::from_le_bytes([chunk[0], chunk[1]]);
            assert!((pcm[i] as i32 - restored as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(24000, vec![vec![0.0; 12000]]);
        assert!((frame.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_silence_round_trip() {
        // A capture block of silence survives quantize → encode → decode
        let block = vec![0.0f32; 2048];
        let pcm = f32_to_pcm16(&block);
        assert_eq!(pcm.len(), 4096);
        assert!(pcm.iter().all(|&b| b == 0));

        let payload = encode_from_bytes(&pcm, 16000);
        assert_eq!(decode_to_bytes(&payload).unwrap(), pcm);
    }
}
