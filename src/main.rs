//! # EYAD Voice - Realtime Voice Pipeline
//!
//! Client-side realtime voice pipeline: capture audio, stream it to a
//! hosted realtime model over a websocket, and play the synthesized
//! replies gaplessly with barge-in support.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **error**: the pipeline's error type and fatality classification
//! - **wire**: JSON message types exchanged with the remote endpoint
//! - **transport**: websocket connector and channel
//! - **session**: lifecycle controller tying capture, channel and playback together
//! - **audio**: codec, capture path and playback scheduler
//!
//! ## Demo Binary:
//! Without real microphone/speaker hardware in scope, the binary streams a
//! 16 kHz mono WAV file as the capture source and renders received audio to
//! an output WAV file, paced like a live call.

mod config;
mod error;
mod session;
mod transport;
mod wire;

mod audio;

use anyhow::Result;
use config::AppConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio::capture::WavFileSource;
use audio::playback::{WallClock, WavFileOutput};
use session::{Session, SessionConfig};
use transport::WebSocketConnector;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let app_config = AppConfig::load()?;
    app_config.validate()?;

    info!("Starting eyad-voice v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Endpoint: {}, voice: {}, language: {}",
        app_config.api.endpoint, app_config.voice.voice, app_config.voice.language
    );

    // Demo I/O paths: argv[1] is the input WAV, argv[2] the output WAV
    let mut args = std::env::args().skip(1);
    let input_path = args
        .next()
        .unwrap_or_else(|| "input.wav".to_string());
    let output_path = args
        .next()
        .unwrap_or_else(|| "output.wav".to_string());

    let session_config = SessionConfig::from_app(&app_config).map_err(|e| anyhow::anyhow!(e))?;
    let capture_rate = session_config.capture_sample_rate;
    let playback_rate = session_config.playback_sample_rate;

    let mut session = Session::new(
        session_config,
        WallClock::new(),
        WavFileOutput::new(&output_path, playback_rate),
    );

    info!(
        "Session {} created at {}",
        session.session_id(),
        session.created_at().to_rfc3339()
    );

    let source = WavFileSource::new(&input_path, capture_rate);
    let connector = WebSocketConnector::new(&app_config.api);

    if let Err(e) = session.start(source, &connector).await {
        error!("Failed to start session: {}", e);
        return Err(anyhow::anyhow!(e));
    }

    // A signal handler requests a stop; the session tears itself down
    let stop = session.stop_handle();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, stopping session...");
        stop.request_stop();
    });

    match session.run().await {
        Ok(()) => info!("Session ended"),
        Err(e) => {
            error!("Session failed: {}", e);
            return Err(anyhow::anyhow!(e));
        }
    }

    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` controls verbosity; the default keeps this crate at debug and
/// everything else at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eyad_voice=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Resolve when SIGTERM or SIGINT arrives.
async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            return;
        }
    };
    let mut sigint =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to install SIGINT handler: {}", e);
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}
