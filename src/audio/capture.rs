//! # Capture Path
//!
//! Continuously converts live input audio into outbound transcoded frames
//! while the session is active.
//!
//! ## Pipeline per block:
//! 1. Read one fixed-size block of mono samples from the capture source
//! 2. Quantize to 16-bit PCM
//! 3. Transcode to a payload tagged `audio/pcm;rate=16000`
//! 4. Send into a bounded outbound queue
//!
//! ## Backpressure:
//! Sends into the queue are awaited, so a slow channel blocks the producer
//! at the queue bound instead of letting unacknowledged sends pile up
//! behind the capture cadence.

use crate::audio::codec::{self, TranscodedPayload};
use crate::error::{VoiceError, VoiceResult};
use crate::session::SessionState;
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Source of fixed-size capture blocks.
///
/// Models the host runtime's "on block ready" callback as an explicit pull
/// interface so the pipeline is portable across audio environments.
pub trait CaptureSource {
    /// Acquire the underlying device or stream.
    ///
    /// ## Errors:
    /// `Acquisition` if access is denied or the source is unusable; the
    /// session treats this as fatal to startup.
    fn open(&mut self) -> impl std::future::Future<Output = VoiceResult<()>> + Send;

    /// Produce the next block of mono samples, or `None` at end of input.
    fn next_block(
        &mut self,
        block_samples: usize,
    ) -> impl std::future::Future<Output = VoiceResult<Option<Vec<f32>>>> + Send;

    /// Release the underlying device or stream. Must not panic.
    fn release(&mut self);
}

/// Outbound half of the capture pipeline.
///
/// Quantizes and transcodes blocks, then forwards them on the bounded
/// outbound queue. Production is gated on the shared session state: blocks
/// arriving outside `Active` are discarded.
pub struct CapturePath {
    sample_rate: u32,
    state: Arc<RwLock<SessionState>>,
    tx: mpsc::Sender<TranscodedPayload>,
    blocks_sent: u64,
}

impl CapturePath {
    pub fn new(
        sample_rate: u32,
        state: Arc<RwLock<SessionState>>,
        tx: mpsc::Sender<TranscodedPayload>,
    ) -> Self {
        Self {
            sample_rate,
            state,
            tx,
            blocks_sent: 0,
        }
    }

    fn is_active(&self) -> bool {
        self.state
            .read()
            .map(|s| *s == SessionState::Active)
            .unwrap_or(false)
    }

    /// Process one capture block.
    ///
    /// ## Returns:
    /// - `Ok(true)`: the block was forwarded
    /// - `Ok(false)`: the session is not active; the block was discarded
    /// - `Err(Channel)`: the outbound queue is gone (session tore down)
    pub async fn push_block(&mut self, samples: &[f32]) -> VoiceResult<bool> {
        if !self.is_active() {
            return Ok(false);
        }

        let pcm = codec::f32_to_pcm16(samples);
        let payload = codec::encode_from_bytes(&pcm, self.sample_rate);

        // Awaited bounded send: backpressure blocks the producer here
        self.tx
            .send(payload)
            .await
            .map_err(|_| VoiceError::Channel("outbound queue closed".to_string()))?;

        self.blocks_sent += 1;
        Ok(true)
    }

    /// Blocks forwarded so far.
    pub fn blocks_sent(&self) -> u64 {
        self.blocks_sent
    }
}

/// Drive a capture source until end of input or the session leaves `Active`.
///
/// The task owns the source for its whole life and releases it on exit,
/// whichever way the loop ends.
pub fn spawn_capture_task<S>(
    mut source: S,
    mut path: CapturePath,
    block_samples: usize,
) -> tokio::task::JoinHandle<()>
where
    S: CaptureSource + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let block = match source.next_block(block_samples).await {
                Ok(Some(block)) => block,
                Ok(None) => {
                    info!("Capture source reached end of input");
                    break;
                }
                Err(e) => {
                    warn!("Capture source error: {}", e);
                    break;
                }
            };

            match path.push_block(&block).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Session no longer active, stopping capture");
                    break;
                }
                Err(e) => {
                    debug!("Outbound queue closed, stopping capture: {}", e);
                    break;
                }
            }
        }

        source.release();
        info!("Capture task finished after {} block(s)", path.blocks_sent());
    })
}

/// WAV-file capture source: the demo binary's stand-in for a microphone.
///
/// Reads a 16 kHz mono 16-bit PCM file and yields blocks paced to real
/// time, so the remote endpoint sees a live-speech cadence.
pub struct WavFileSource {
    path: PathBuf,
    expected_rate: u32,
    samples: Vec<f32>,
    position: usize,
    paced: bool,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>, expected_rate: u32) -> Self {
        Self {
            path: path.into(),
            expected_rate,
            samples: Vec::new(),
            position: 0,
            paced: true,
        }
    }

    /// Disable real-time pacing (test hook).
    #[cfg(test)]
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

impl CaptureSource for WavFileSource {
    async fn open(&mut self) -> VoiceResult<()> {
        let mut file = File::open(&self.path)?;
        let (header, data) = wav::read(&mut file)?;

        if header.sampling_rate != self.expected_rate {
            return Err(VoiceError::Acquisition(format!(
                "Sample rate mismatch: expected {}, got {}",
                self.expected_rate, header.sampling_rate
            )));
        }
        if header.channel_count != 1 {
            return Err(VoiceError::Acquisition(format!(
                "Channel count mismatch: expected 1, got {}",
                header.channel_count
            )));
        }

        self.samples = match data {
            wav::BitDepth::Sixteen(samples) => {
                samples.iter().map(|&s| s as f32 / 32768.0).collect()
            }
            _ => {
                return Err(VoiceError::Acquisition(
                    "Only 16-bit PCM WAV input is supported".to_string(),
                ))
            }
        };

        info!(
            "Opened capture source {} ({} samples, {:.1}s)",
            self.path.display(),
            self.samples.len(),
            self.samples.len() as f64 / self.expected_rate as f64
        );
        Ok(())
    }

    async fn next_block(&mut self, block_samples: usize) -> VoiceResult<Option<Vec<f32>>> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }

        if self.paced {
            let block_secs = block_samples as f64 / self.expected_rate as f64;
            tokio::time::sleep(Duration::from_secs_f64(block_secs)).await;
        }

        let end = (self.position + block_samples).min(self.samples.len());
        let mut block = self.samples[self.position..end].to_vec();
        self.position = end;

        // Final short block is zero-padded to keep the block size fixed
        block.resize(block_samples, 0.0);
        Ok(Some(block))
    }

    fn release(&mut self) {
        self.samples.clear();
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::decode_to_bytes;

    fn shared_state(state: SessionState) -> Arc<RwLock<SessionState>> {
        Arc::new(RwLock::new(state))
    }

    #[tokio::test]
    async fn test_silence_block_quantizes_to_zero_payload() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut path = CapturePath::new(16000, shared_state(SessionState::Active), tx);

        let block = vec![0.0f32; 2048];
        assert!(path.push_block(&block).await.unwrap());

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
        let bytes = decode_to_bytes(&payload).unwrap();
        assert_eq!(bytes.len(), 4096);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_blocks_discarded_outside_active_state() {
        let state = shared_state(SessionState::Active);
        let (tx, mut rx) = mpsc::channel(4);
        let mut path = CapturePath::new(16000, state.clone(), tx);

        assert!(path.push_block(&[0.1; 16]).await.unwrap());

        *state.write().unwrap() = SessionState::Closing;
        assert!(!path.push_block(&[0.1; 16]).await.unwrap());

        // Only the first block made it onto the queue
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
        assert_eq!(path.blocks_sent(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_is_a_channel_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut path = CapturePath::new(16000, shared_state(SessionState::Active), tx);

        let err = path.push_block(&[0.0; 16]).await.unwrap_err();
        assert!(matches!(err, VoiceError::Channel(_)));
    }

    #[tokio::test]
    async fn test_wav_source_yields_fixed_blocks() {
        let path = "/tmp/eyad-voice-test-capture.wav";
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, 16000, 16);
        let samples: Vec<i16> = (0..3000).map(|i| (i % 100) as i16).collect();
        let mut file = File::create(path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file).unwrap();

        let mut source = WavFileSource::new(path, 16000).unpaced();
        source.open().await.unwrap();

        let first = source.next_block(2048).await.unwrap().unwrap();
        assert_eq!(first.len(), 2048);

        // 3000 samples: the second block is short and zero-padded
        let second = source.next_block(2048).await.unwrap().unwrap();
        assert_eq!(second.len(), 2048);
        assert!(second[952..].iter().all(|&s| s == 0.0));

        assert!(source.next_block(2048).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wav_source_rejects_wrong_rate() {
        let path = "/tmp/eyad-voice-test-badrate.wav";
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, 44100, 16);
        let mut file = File::create(path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(vec![0; 64]), &mut file).unwrap();

        let mut source = WavFileSource::new(path, 16000);
        let err = source.open().await.unwrap_err();
        assert!(matches!(err, VoiceError::Acquisition(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_acquisition_failure() {
        let mut source = WavFileSource::new("/tmp/eyad-voice-does-not-exist.wav", 16000);
        let err = source.open().await.unwrap_err();
        assert!(matches!(err, VoiceError::Acquisition(_)));
    }
}
