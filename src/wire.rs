//! # Realtime Channel Wire Types
//!
//! Message types exchanged with the hosted realtime voice endpoint.
//!
//! ## Protocol:
//! 1. **Setup**: the client opens the channel and sends one setup message
//!    naming the model, the response modality (audio), the voice and the
//!    system instruction
//! 2. **Acknowledgment**: the server replies with `setupComplete`; the
//!    channel counts as open only after that
//! 3. **Outbound audio**: one `media` message per capture block, carrying a
//!    base64 PCM payload tagged `audio/pcm;rate=16000`
//! 4. **Inbound audio**: server content envelopes whose model turn carries
//!    inline PCM data at 24 kHz; an `interrupted` flag signals barge-in
//!
//! ## Message Format:
//! All messages are JSON text frames with camelCase field names.

use crate::audio::codec::TranscodedPayload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Messages sent from this client to the remote endpoint.
///
/// Externally tagged so each variant serializes as a single-key envelope:
/// `{"setup": {...}}` or `{"media": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session configuration, sent once when the channel opens
    Setup(SessionSetup),

    /// One transcoded capture block
    Media(TranscodedPayload),
}

/// Session configuration sent at channel-open time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    /// Remote model identifier
    pub model: String,

    /// Requested response modalities; this pipeline always asks for audio
    pub response_modalities: Vec<ResponseModality>,

    /// Voice used for synthesized replies
    pub voice_name: VoiceName,

    /// Free-text system instruction embedding the spoken-language preference
    pub system_instruction: String,
}

/// Response modality requested from the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// The fixed set of synthesized voices offered by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceName {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Zephyr,
}

impl VoiceName {
    /// All selectable voices, in display order.
    pub fn all() -> [VoiceName; 6] {
        [
            VoiceName::Puck,
            VoiceName::Charon,
            VoiceName::Kore,
            VoiceName::Fenrir,
            VoiceName::Aoede,
            VoiceName::Zephyr,
        ]
    }

    pub fn as_str(&self) -> &str {
        match self {
            VoiceName::Puck => "Puck",
            VoiceName::Charon => "Charon",
            VoiceName::Kore => "Kore",
            VoiceName::Fenrir => "Fenrir",
            VoiceName::Aoede => "Aoede",
            VoiceName::Zephyr => "Zephyr",
        }
    }
}

impl FromStr for VoiceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "puck" => Ok(VoiceName::Puck),
            "charon" => Ok(VoiceName::Charon),
            "kore" => Ok(VoiceName::Kore),
            "fenrir" => Ok(VoiceName::Fenrir),
            "aoede" => Ok(VoiceName::Aoede),
            "zephyr" => Ok(VoiceName::Zephyr),
            _ => Err(format!("Unknown voice name: {}", s)),
        }
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spoken-language preference embedded in the system instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    Arabic,
    English,
    French,
    Spanish,
}

impl Language {
    pub fn as_str(&self) -> &str {
        match self {
            Language::Arabic => "Arabic",
            Language::English => "English",
            Language::French => "French",
            Language::Spanish => "Spanish",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arabic" | "ar" => Ok(Language::Arabic),
            "english" | "en" => Ok(Language::English),
            "french" | "fr" => Ok(Language::French),
            "spanish" | "es" => Ok(Language::Spanish),
            _ => Err(format!("Unknown language: {}", s)),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound envelope from the remote endpoint.
///
/// Every field is optional; a given frame carries either the setup
/// acknowledgment or server content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Acknowledgment that the session setup was accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<SetupComplete>,

    /// Model output and turn-control flags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

/// Empty acknowledgment body for `setupComplete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupComplete {}

/// Model output for one streamed chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// The model's current turn, carrying inline audio parts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,

    /// Barge-in signal: the user started speaking, flush pending playback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,

    /// Whether the model finished its turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<TurnPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPart {
    /// Inline audio payload, when this part carries audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<TranscodedPayload>,
}

impl ServerMessage {
    /// Whether this envelope is the setup acknowledgment.
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Whether this envelope signals barge-in.
    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|c| c.interrupted)
            .unwrap_or(false)
    }

    /// The audio payload of the model turn's first part, if any.
    ///
    /// The fixed nested path (`serverContent.modelTurn.parts[0].inlineData`)
    /// is the endpoint's contract; callers never navigate it by hand.
    pub fn audio_payload(&self) -> Option<&TranscodedPayload> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .first()?
            .inline_data
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_message_shape() {
        let msg = ClientMessage::Media(TranscodedPayload {
            data: "AAAA".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["media"]["data"], "AAAA");
        assert_eq!(json["media"]["mimeType"], "audio/pcm;rate=16000");
    }

    #[test]
    fn test_setup_message_shape() {
        let msg = ClientMessage::Setup(SessionSetup {
            model: "models/voice-live-001".to_string(),
            response_modalities: vec![ResponseModality::Audio],
            voice_name: VoiceName::Kore,
            system_instruction: "Always reply in Arabic.".to_string(),
        });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["setup"]["responseModalities"][0], "AUDIO");
        assert_eq!(json["setup"]["voiceName"], "Kore");
        assert_eq!(json["setup"]["systemInstruction"], "Always reply in Arabic.");
    }

    #[test]
    fn test_inbound_audio_path() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"data": "UklGRg==", "mimeType": "audio/pcm;rate=24000"}}
                    ]
                }
            }
        }"#;

        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let payload = msg.audio_payload().unwrap();
        assert_eq!(payload.data, "UklGRg==");
        assert_eq!(payload.mime_type, "audio/pcm;rate=24000");
        assert!(!msg.is_interrupted());
        assert!(!msg.is_setup_complete());
    }

    #[test]
    fn test_inbound_interruption_flag() {
        let raw = r#"{"serverContent": {"interrupted": true}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_interrupted());
        assert!(msg.audio_payload().is_none());
    }

    #[test]
    fn test_setup_complete_envelope() {
        let raw = r#"{"setupComplete": {}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_setup_complete());
    }

    #[test]
    fn test_voice_name_parsing() {
        assert_eq!("puck".parse::<VoiceName>().unwrap(), VoiceName::Puck);
        assert_eq!("Zephyr".parse::<VoiceName>().unwrap(), VoiceName::Zephyr);
        assert!("alto".parse::<VoiceName>().is_err());
        assert_eq!(VoiceName::all().len(), 6);
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("Arabic".parse::<Language>().unwrap(), Language::Arabic);
        assert_eq!("es".parse::<Language>().unwrap(), Language::Spanish);
        assert!("klingon".parse::<Language>().is_err());
    }
}
