//! # Realtime Channel Transport
//!
//! Opens and drives the bidirectional websocket to the hosted realtime
//! voice endpoint.
//!
//! ## Connection Flow:
//! 1. Connect to the configured websocket URL with the API key attached
//! 2. Send the session setup message as the first text frame
//! 3. Wait for the server's `setupComplete` acknowledgment
//! 4. Hand the open channel to the session for full-duplex streaming
//!
//! The connector and channel are traits so the session can be driven by a
//! scripted channel in tests without any network.

use crate::audio::codec::TranscodedPayload;
use crate::config::ApiConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::wire::{ClientMessage, ServerMessage, SessionSetup};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Opens realtime channels.
pub trait RealtimeConnector {
    type Channel: RealtimeChannel;

    /// Open a channel and complete the setup handshake.
    ///
    /// The channel counts as open only once the remote has acknowledged the
    /// setup; resolving earlier would let media frames race the handshake.
    fn open(
        &self,
        setup: SessionSetup,
    ) -> impl Future<Output = VoiceResult<Self::Channel>> + Send;
}

/// An open, acknowledged realtime channel.
pub trait RealtimeChannel {
    /// Send one transcoded capture block.
    fn send_media(
        &mut self,
        payload: TranscodedPayload,
    ) -> impl Future<Output = VoiceResult<()>> + Send;

    /// Receive the next inbound envelope.
    ///
    /// ## Returns:
    /// - `Some(Ok(message))`: a parsed envelope
    /// - `Some(Err(MalformedPayload))`: an unparseable frame; droppable
    /// - `Some(Err(Channel))`: the transport failed; fatal
    /// - `None`: the remote closed the channel
    fn next_event(&mut self) -> impl Future<Output = Option<VoiceResult<ServerMessage>>> + Send;

    /// Close the channel.
    fn close(&mut self) -> impl Future<Output = VoiceResult<()>> + Send;
}

/// Websocket connector for the hosted endpoint.
pub struct WebSocketConnector {
    endpoint: String,
    api_key: String,
}

impl WebSocketConnector {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            endpoint: api.endpoint.clone(),
            api_key: api.api_key.clone(),
        }
    }

    fn connection_url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

impl RealtimeConnector for WebSocketConnector {
    type Channel = WebSocketChannel;

    async fn open(&self, setup: SessionSetup) -> VoiceResult<WebSocketChannel> {
        if self.api_key.is_empty() {
            return Err(VoiceError::Acquisition(
                "API key is empty; set EYAD_API_KEY or GEMINI_API_KEY".to_string(),
            ));
        }

        let (mut ws, _response) = connect_async(self.connection_url()).await?;
        debug!("Websocket connected to {}", self.endpoint);

        let setup_json = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| VoiceError::Channel(format!("Failed to serialize setup: {}", e)))?;
        ws.send(Message::Text(setup_json)).await?;

        // The channel is open once the server acknowledges the setup
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) if message.is_setup_complete() => {
                            info!("Realtime channel open");
                            return Ok(WebSocketChannel { ws });
                        }
                        Ok(_) => {
                            debug!("Ignoring pre-acknowledgment frame");
                        }
                        Err(e) => {
                            warn!("Unparseable frame during handshake: {}", e);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    ws.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(VoiceError::Channel(
                        "Channel closed before setup acknowledgment".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// An open websocket channel carrying JSON text frames.
#[derive(Debug)]
pub struct WebSocketChannel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RealtimeChannel for WebSocketChannel {
    async fn send_media(&mut self, payload: TranscodedPayload) -> VoiceResult<()> {
        let json = serde_json::to_string(&ClientMessage::Media(payload))
            .map_err(|e| VoiceError::Channel(format!("Failed to serialize media: {}", e)))?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<VoiceResult<ServerMessage>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str::<ServerMessage>(&text).map_err(|e| {
                        VoiceError::MalformedPayload(format!("Unparseable envelope: {}", e))
                    }));
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(Message::Binary(_)) => {
                    return Some(Err(VoiceError::MalformedPayload(
                        "Unexpected binary frame".to_string(),
                    )));
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> VoiceResult<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ResponseModality, VoiceName};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn test_setup() -> SessionSetup {
        SessionSetup {
            model: "models/voice-live-001".to_string(),
            response_modalities: vec![ResponseModality::Audio],
            voice_name: VoiceName::Puck,
            system_instruction: "Always speak in Arabic.".to_string(),
        }
    }

    fn test_connector(port: u16) -> WebSocketConnector {
        WebSocketConnector {
            endpoint: format!("ws://127.0.0.1:{}", port),
            api_key: "test-key".to_string(),
        }
    }

    /// Minimal scripted endpoint: acknowledge setup, forward one audio
    /// frame per received media message, then close.
    async fn serve_one_exchange(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        // Expect the setup envelope first
        let first = ws.next().await.unwrap().unwrap();
        let setup: serde_json::Value =
            serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert!(setup.get("setup").is_some());
        assert_eq!(setup["setup"]["voiceName"], "Puck");

        ws.send(Message::Text(r#"{"setupComplete": {}}"#.to_string()))
            .await
            .unwrap();

        // One media in, one audio envelope out
        let media = ws.next().await.unwrap().unwrap();
        let media: serde_json::Value =
            serde_json::from_str(media.to_text().unwrap()).unwrap();
        assert_eq!(media["media"]["mimeType"], "audio/pcm;rate=16000");

        let reply = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [{"inlineData": {"data": "AAAA", "mimeType": "audio/pcm;rate=24000"}}]
                }
            }
        }"#;
        ws.send(Message::Text(reply.to_string())).await.unwrap();
        ws.close(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_one_exchange(listener));

        let connector = test_connector(port);
        let mut channel = connector.open(test_setup()).await.unwrap();

        channel
            .send_media(TranscodedPayload {
                data: "AAAA".to_string(),
                mime_type: "audio/pcm;rate=16000".to_string(),
            })
            .await
            .unwrap();

        let event = channel.next_event().await.unwrap().unwrap();
        assert_eq!(event.audio_payload().unwrap().data, "AAAA");

        // Remote close surfaces as end of stream
        assert!(channel.next_event().await.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_is_droppable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _setup = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(r#"{"setupComplete": {}}"#.to_string()))
                .await
                .unwrap();
            ws.send(Message::Text("this is not json".to_string()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let connector = test_connector(port);
        let mut channel = connector.open(test_setup()).await.unwrap();

        let err = channel.next_event().await.unwrap().unwrap_err();
        assert!(matches!(err, VoiceError::MalformedPayload(_)));
        assert!(!err.is_fatal());

        assert!(channel.next_event().await.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_before_acknowledgment_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _setup = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
        });

        let connector = test_connector(port);
        let err = connector.open(test_setup()).await.unwrap_err();
        assert!(matches!(err, VoiceError::Channel(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_api_key_never_connects() {
        let connector = WebSocketConnector {
            endpoint: "ws://127.0.0.1:9".to_string(),
            api_key: String::new(),
        };
        let err = connector.open(test_setup()).await.unwrap_err();
        assert!(matches!(err, VoiceError::Acquisition(_)));
    }
}
