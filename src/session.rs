//! # Session Lifecycle Controller
//!
//! Owns one realtime voice call end to end: the capture path, the outbound
//! queue, the bidirectional channel and the playback scheduler.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: nothing acquired
//! 2. **Connecting**: capture source acquired, channel opening
//! 3. **Active**: channel acknowledged open, audio flowing both ways
//! 4. **Closing**: teardown in progress
//!
//! The only transitions out of the linear path are the fatal-error
//! transition back to Idle and the barge-in sub-transition (Active →
//! Active with a playback flush).
//!
//! ## Teardown discipline:
//! `stop()` performs every release step unconditionally and independently
//! guarded: close the channel, stop the capture task, flush playback,
//! release the output. A failure in one step is logged and never blocks the
//! others; teardown never returns an error and is idempotent.

use crate::audio::capture::{spawn_capture_task, CapturePath, CaptureSource};
use crate::audio::codec::{self, TranscodedPayload};
use crate::audio::playback::{AudioOutput, OutputClock, PlaybackScheduler};
use crate::config::AppConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::transport::{RealtimeChannel, RealtimeConnector};
use crate::wire::{Language, ResponseModality, ServerMessage, SessionSetup, VoiceName};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current state of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing acquired, ready to start
    Idle,
    /// Capture acquired, channel opening
    Connecting,
    /// Streaming in both directions
    Active,
    /// Teardown in progress
    Closing,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
        }
    }
}

/// By-value configuration snapshot taken at session start.
///
/// The pipeline never reads ambient configuration after this point, so
/// runtime config updates cannot affect a call in progress.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub voice: VoiceName,
    pub language: Language,
    pub system_instruction: String,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub channels: usize,
    pub capture_block_samples: usize,
    pub outbound_queue_depth: usize,
}

impl SessionConfig {
    /// Snapshot the relevant parts of the application configuration.
    pub fn from_app(config: &AppConfig) -> VoiceResult<Self> {
        let voice = config
            .voice
            .voice
            .parse::<VoiceName>()
            .map_err(VoiceError::Config)?;
        let language = config
            .voice
            .language
            .parse::<Language>()
            .map_err(VoiceError::Config)?;

        Ok(Self {
            model: config.api.model.clone(),
            voice,
            language,
            system_instruction: config.system_instruction(),
            capture_sample_rate: config.audio.capture_sample_rate,
            playback_sample_rate: config.audio.playback_sample_rate,
            channels: config.audio.channels,
            capture_block_samples: config.audio.capture_block_samples,
            outbound_queue_depth: config.audio.outbound_queue_depth,
        })
    }
}

/// Counters for one session.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Capture blocks sent over the channel
    pub blocks_sent: u64,

    /// Encoded payload bytes sent over the channel
    pub bytes_sent: u64,

    /// Inbound audio frames scheduled for playback
    pub frames_received: u64,

    /// Inbound frames dropped as malformed
    pub frames_dropped: u64,

    /// Barge-in interruptions handled
    pub interruptions: u64,
}

/// Handle for requesting a stop from outside the running pump.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the running session to tear down. Safe to call repeatedly.
    pub fn request_stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// One live voice call.
///
/// Exactly one session is live at a time per pipeline instance; the capture
/// stream, the channel, the output clock and the live playback handles are
/// all owned here and nowhere else.
pub struct Session<Ch, K, O>
where
    Ch: RealtimeChannel,
    K: OutputClock,
    O: AudioOutput,
{
    session_id: String,
    created_at: DateTime<Utc>,
    config: SessionConfig,
    state: Arc<RwLock<SessionState>>,
    scheduler: PlaybackScheduler<K, O>,
    channel: Option<Ch>,
    outbound_rx: Option<mpsc::Receiver<TranscodedPayload>>,
    capture_task: Option<tokio::task::JoinHandle<()>>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    stats: SessionStats,
}

impl<Ch, K, O> Session<Ch, K, O>
where
    Ch: RealtimeChannel,
    K: OutputClock,
    O: AudioOutput,
{
    pub fn new(config: SessionConfig, clock: K, output: O) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            config,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            scheduler: PlaybackScheduler::new(clock, output),
            channel: None,
            outbound_rx: None,
            capture_task: None,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            stats: SessionStats::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.state.read().map(|s| *s).unwrap_or(SessionState::Idle)
    }

    fn set_state(&self, new_state: SessionState) {
        if let Ok(mut state) = self.state.write() {
            debug!(
                "Session {}: {} -> {}",
                self.session_id,
                state.as_str(),
                new_state.as_str()
            );
            *state = new_state;
        }
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.interruptions = self.scheduler.interruption_count();
        stats
    }

    /// Handle for stopping the session from another task or signal handler.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// The setup message announcing this session's configuration.
    pub fn setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.config.model.clone(),
            response_modalities: vec![ResponseModality::Audio],
            voice_name: self.config.voice,
            system_instruction: self.config.system_instruction.clone(),
        }
    }

    /// Start the session: Idle → Connecting → Active.
    ///
    /// ## Order of acquisition:
    /// The capture source is acquired before any channel is opened, so a
    /// denied microphone never leaves a half-open connection behind. On any
    /// failure everything acquired so far is released and the session
    /// returns to Idle with the error propagated to the caller.
    ///
    /// Calling `start()` from any state other than Idle is a logged no-op.
    pub async fn start<S, N>(&mut self, mut source: S, connector: &N) -> VoiceResult<()>
    where
        S: CaptureSource + Send + 'static,
        N: RealtimeConnector<Channel = Ch>,
    {
        if self.state() != SessionState::Idle {
            warn!(
                "start() ignored: session {} is {}",
                self.session_id,
                self.state().as_str()
            );
            return Ok(());
        }
        self.set_state(SessionState::Connecting);

        if let Err(e) = source.open().await {
            self.set_state(SessionState::Idle);
            return Err(e);
        }

        let channel = match connector.open(self.setup()).await {
            Ok(channel) => channel,
            Err(e) => {
                source.release();
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(self.config.outbound_queue_depth);
        let capture = CapturePath::new(self.config.capture_sample_rate, self.state.clone(), tx);

        self.channel = Some(channel);
        self.outbound_rx = Some(rx);
        self.set_state(SessionState::Active);
        self.capture_task = Some(spawn_capture_task(
            source,
            capture,
            self.config.capture_block_samples,
        ));

        info!(
            "Session {} active: voice={}, language={}, capture {} Hz, playback {} Hz",
            self.session_id,
            self.config.voice,
            self.config.language,
            self.config.capture_sample_rate,
            self.config.playback_sample_rate
        );
        Ok(())
    }

    /// Pump the session until the remote closes, a fatal error occurs or a
    /// stop is requested. Tears down before returning either way.
    ///
    /// ## Returns:
    /// - `Ok(())` on remote close or requested stop
    /// - `Err(Channel)` if the transport failed mid-call (the caller's
    ///   "connection lost" surface)
    pub async fn run(&mut self) -> VoiceResult<()> {
        if self.state() != SessionState::Active {
            return Err(VoiceError::InvalidState(format!(
                "run() requires an active session, state is {}",
                self.state().as_str()
            )));
        }

        let mut channel = match self.channel.take() {
            Some(channel) => channel,
            None => {
                return Err(VoiceError::InvalidState(
                    "active session has no channel".to_string(),
                ))
            }
        };
        let mut outbound = self
            .outbound_rx
            .take()
            .map(ReceiverStream::new)
            .ok_or_else(|| {
                VoiceError::InvalidState("active session has no outbound queue".to_string())
            })?;

        let mut stop_rx = self.stop_rx.clone();
        let mut capture_done = false;

        let result = loop {
            self.scheduler.reap_ended();

            // A stop requested before this pump subscribed still counts
            if *stop_rx.borrow() {
                info!("Session {}: stop requested", self.session_id);
                break Ok(());
            }

            tokio::select! {
                _ = stop_rx.changed() => {
                    info!("Session {}: stop requested", self.session_id);
                    break Ok(());
                }

                maybe_payload = outbound.next(), if !capture_done => {
                    match maybe_payload {
                        Some(payload) => {
                            let payload_bytes = payload.data.len() as u64;
                            if let Err(e) = channel.send_media(payload).await {
                                warn!("Session {}: outbound send failed: {}", self.session_id, e);
                                break Err(e);
                            }
                            self.stats.blocks_sent += 1;
                            self.stats.bytes_sent += payload_bytes;
                        }
                        None => {
                            // Capture finished; keep draining inbound audio
                            debug!("Session {}: capture path drained", self.session_id);
                            capture_done = true;
                        }
                    }
                }

                event = channel.next_event() => {
                    match event {
                        Some(Ok(message)) => self.handle_server_message(message),
                        Some(Err(e)) if e.is_fatal() => {
                            warn!("Session {}: channel failed: {}", self.session_id, e);
                            break Err(e);
                        }
                        Some(Err(e)) => {
                            // Malformed frame: drop it, keep the session alive
                            warn!("Session {}: dropping inbound frame: {}", self.session_id, e);
                            self.stats.frames_dropped += 1;
                        }
                        None => {
                            info!("Session {}: remote closed the channel", self.session_id);
                            break Ok(());
                        }
                    }
                }
            }
        };

        self.teardown(Some(channel)).await;
        result
    }

    /// Apply one inbound envelope: barge-in first, then any audio payload.
    fn handle_server_message(&mut self, message: ServerMessage) {
        if message.is_interrupted() {
            self.scheduler.interrupt();
        }

        if let Some(payload) = message.audio_payload() {
            match codec::decode_to_bytes(payload) {
                Ok(bytes) => {
                    let frame = codec::pcm16_to_frame(
                        &bytes,
                        self.config.playback_sample_rate,
                        self.config.channels,
                    );
                    self.scheduler.schedule(frame);
                    self.stats.frames_received += 1;
                }
                Err(e) => {
                    warn!("Session {}: dropping inbound frame: {}", self.session_id, e);
                    self.stats.frames_dropped += 1;
                }
            }
        }
    }

    /// Stop the session from any non-Idle state. No-op when Idle.
    pub async fn stop(&mut self) {
        if self.state() == SessionState::Idle {
            debug!("stop() ignored: session {} already idle", self.session_id);
            return;
        }
        let _ = self.stop_tx.send(true);
        self.teardown(None).await;
    }

    /// Release everything, best effort, in a fixed order.
    ///
    /// Each step is independently guarded so a failure in one never blocks
    /// the ones after it. Teardown never returns an error.
    async fn teardown(&mut self, channel: Option<Ch>) {
        self.set_state(SessionState::Closing);

        // 1. Close the channel
        if let Some(mut channel) = channel.or_else(|| self.channel.take()) {
            if let Err(e) = channel.close().await {
                warn!("Session {}: error closing channel: {}", self.session_id, e);
            }
        }

        // 2. Stop the capture task; it exits on its own once the state
        //    leaves Active, so give it one grace period before aborting
        self.outbound_rx = None;
        if let Some(task) = self.capture_task.take() {
            if tokio::time::timeout(Duration::from_millis(500), task)
                .await
                .is_err()
            {
                warn!("Session {}: capture task did not stop in time", self.session_id);
            }
        }

        // 3. Flush playback: stop every live handle, reset the cursor
        self.scheduler.flush();

        // 4. Release the output device
        self.scheduler.release_output();

        self.set_state(SessionState::Idle);
        let stats = self.stats();
        info!(
            "Session {} closed: {} block(s) out, {} frame(s) in, {} dropped, {} interruption(s)",
            self.session_id,
            stats.blocks_sent,
            stats.frames_received,
            stats.frames_dropped,
            stats.interruptions
        );
    }
}
