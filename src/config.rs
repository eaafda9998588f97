//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Bare environment variables used for secrets (EYAD_API_KEY, GEMINI_API_KEY)
//! 2. Environment variables with APP_ prefix (APP_API_ENDPOINT, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Why a by-value snapshot:
//! The session takes its configuration by value at start time. Nothing in
//! the pipeline reads ambient configuration after that point, so a running
//! call is unaffected by runtime config updates.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::wire::{Language, VoiceName};

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (api, audio, voice) keeps the
/// endpoint credentials, the fixed audio format contract and the
/// user-facing voice preferences independently overridable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub audio: AudioSettings,
    pub voice: VoiceSettings,
}

/// Remote endpoint configuration.
///
/// ## Fields:
/// - `endpoint`: websocket URL of the hosted realtime voice service
/// - `model`: remote model identifier sent in the session setup
/// - `api_key`: credential appended to the connection URL; empty by default
///   and normally supplied via EYAD_API_KEY or GEMINI_API_KEY
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

/// Fixed audio format contract for the realtime pipeline.
///
/// ## Fields:
/// - `capture_sample_rate`: outbound PCM rate in Hz (the endpoint expects 16000)
/// - `playback_sample_rate`: inbound PCM rate in Hz (the endpoint sends 24000)
/// - `channels`: channel count (mono)
/// - `capture_block_samples`: samples per capture block (2048 per callback)
/// - `outbound_queue_depth`: bounded outbound queue length; a full queue
///   blocks the capture producer instead of racing the channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub channels: usize,
    pub capture_block_samples: usize,
    pub outbound_queue_depth: usize,
}

/// User-facing voice preferences.
///
/// ## Fields:
/// - `voice`: one of the endpoint's six synthesized voices
/// - `language`: spoken-language preference embedded in the instruction
/// - `instruction_template`: system instruction with a `{language}` placeholder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub voice: String,
    pub language: String,
    pub instruction_template: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                endpoint: "wss://generativelanguage.googleapis.com/ws/voice.live".to_string(),
                model: "models/voice-live-001".to_string(),
                api_key: String::new(), // Supplied via environment
            },
            audio: AudioSettings {
                capture_sample_rate: 16000, // Outbound PCM rate the endpoint expects
                playback_sample_rate: 24000, // Inbound PCM rate the endpoint sends
                channels: 1,                 // Mono audio
                capture_block_samples: 2048, // One capture callback's worth
                outbound_queue_depth: 8,     // Bounded send queue (backpressure)
            },
            voice: VoiceSettings {
                voice: "Puck".to_string(),
                language: "Arabic".to_string(),
                instruction_template:
                    "You are EYAD, a friendly study companion. Always speak in {language}."
                        .to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle bare secret variables (EYAD_API_KEY, GEMINI_API_KEY)
    ///
    /// ## Environment Variable Examples:
    /// - `APP_API_ENDPOINT=wss://...`: override the endpoint URL
    /// - `APP_VOICE_LANGUAGE=French`: override the spoken language
    /// - `EYAD_API_KEY=...`: supply the credential without the APP_ prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            // Example: APP_API_MODEL becomes api.model in the config
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Secrets don't follow the APP_ prefix convention; accept the
        // app-specific name first, then the vendor's conventional one
        if let Ok(key) = env::var("EYAD_API_KEY") {
            settings = settings.set_override("api.api_key", key)?;
        } else if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("api.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Sample rates, block size and queue depth are nonzero
    /// - The channel count is mono (the only layout the endpoint accepts)
    /// - The voice and language names parse against their fixed sets
    /// - The endpoint URL is a websocket URL
    pub fn validate(&self) -> Result<()> {
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!(
                "Only mono audio is supported, got {} channels",
                self.audio.channels
            ));
        }

        if self.audio.capture_block_samples == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        if self.audio.outbound_queue_depth == 0 {
            return Err(anyhow::anyhow!("Outbound queue depth must be greater than 0"));
        }

        if !self.api.endpoint.starts_with("wss://") && !self.api.endpoint.starts_with("ws://") {
            return Err(anyhow::anyhow!(
                "API endpoint must be a websocket URL: {}",
                self.api.endpoint
            ));
        }

        self.voice
            .voice
            .parse::<VoiceName>()
            .map_err(|e| anyhow::anyhow!(e))?;
        self.voice
            .language
            .parse::<Language>()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed. For example,
    /// `{"voice": {"language": "French"}}` switches the language and leaves
    /// everything else untouched. The updated configuration is re-validated.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(api) = partial.get("api") {
            if let Some(endpoint) = api.get("endpoint").and_then(|v| v.as_str()) {
                self.api.endpoint = endpoint.to_string();
            }
            if let Some(model) = api.get("model").and_then(|v| v.as_str()) {
                self.api.model = model.to_string();
            }
            if let Some(key) = api.get("api_key").and_then(|v| v.as_str()) {
                self.api.api_key = key.to_string();
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(rate) = audio.get("capture_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.capture_sample_rate = rate as u32;
            }
            if let Some(rate) = audio.get("playback_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.playback_sample_rate = rate as u32;
            }
            if let Some(block) = audio.get("capture_block_samples").and_then(|v| v.as_u64()) {
                self.audio.capture_block_samples = block as usize;
            }
            if let Some(depth) = audio.get("outbound_queue_depth").and_then(|v| v.as_u64()) {
                self.audio.outbound_queue_depth = depth as usize;
            }
        }

        if let Some(voice) = partial.get("voice") {
            if let Some(name) = voice.get("voice").and_then(|v| v.as_str()) {
                self.voice.voice = name.to_string();
            }
            if let Some(language) = voice.get("language").and_then(|v| v.as_str()) {
                self.voice.language = language.to_string();
            }
            if let Some(template) = voice.get("instruction_template").and_then(|v| v.as_str()) {
                self.voice.instruction_template = template.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Render the system instruction with the selected language substituted.
    pub fn system_instruction(&self) -> String {
        self.voice
            .instruction_template
            .replace("{language}", &self.voice.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.capture_sample_rate, 16000);
        assert_eq!(config.audio.playback_sample_rate, 24000);
        assert_eq!(config.audio.capture_block_samples, 2048);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.audio.capture_block_samples = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.voice.voice = "Baritone".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.api.endpoint = "https://not-a-websocket".to_string();
        assert!(config.validate().is_err());
    }

    /// Test that runtime configuration updates work correctly.
    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"voice": {"language": "French", "voice": "Kore"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.voice.language, "French");
        assert_eq!(config.voice.voice, "Kore");
        // Other fields should remain unchanged
        assert_eq!(config.audio.capture_sample_rate, 16000);
    }

    /// Test that updates leaving the config invalid are rejected.
    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"voice": {"language": "Klingon"}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_system_instruction_embeds_language() {
        let mut config = AppConfig::default();
        config.voice.language = "Spanish".to_string();
        assert!(config.system_instruction().contains("Spanish"));
        assert!(!config.system_instruction().contains("{language}"));
    }
}
