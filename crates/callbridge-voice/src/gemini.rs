//! Gemini Live realtime provider.
//!
//! Speaks the `BidiGenerateContent` WebSocket protocol: one `setup` frame,
//! a `setupComplete` acknowledgement, then `realtimeInput` audio frames
//! upstream and `serverContent` frames downstream. Server frames may arrive
//! as text or binary; both carry JSON.

use crate::bridge::EventSink;
use crate::config::SpeechConfig;
use crate::error::VoiceError;
use crate::provider::{ProviderSession, SpeechEvent, SpeechProvider};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Connects realtime sessions to the Gemini Live API.
#[derive(Debug, Clone)]
pub struct GeminiLiveProvider {
    config: SpeechConfig,
}

impl GeminiLiveProvider {
    pub fn new(config: SpeechConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    fn session_url(&self) -> String {
        let separator = if self.config.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.config.endpoint, separator, self.config.api_key)
    }

    /// Builds the first frame of a session.
    pub fn setup_message(&self, system_prompt: &str) -> serde_json::Value {
        json!({
            "setup": {
                "model": format!("models/{}", self.config.model),
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": self.config.voice }
                        }
                    }
                },
                "systemInstruction": { "parts": [{ "text": system_prompt }] },
                "inputAudioTranscription": {},
                "outputAudioTranscription": {}
            }
        })
    }

    async fn handshake(&self, system_prompt: &str) -> Result<(WsSink, WsSource), VoiceError> {
        let (stream, _) = connect_async(self.session_url()).await?;
        let (mut sink, mut source) = stream.split();

        let setup = self.setup_message(system_prompt).to_string();
        sink.send(Message::Text(setup.into())).await?;

        while let Some(frame) = source.next().await {
            let text = match frame? {
                Message::Text(text) => text.to_string(),
                Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason.as_str()))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(VoiceError::ProviderUnavailable(format!(
                        "connection closed during setup: {}",
                        reason
                    )));
                }
                _ => continue,
            };

            if parse_server_frame(&text)?.setup_complete {
                return Ok((sink, source));
            }
        }

        Err(VoiceError::ProviderUnavailable(
            "connection ended before setup completed".to_string(),
        ))
    }
}

#[async_trait]
impl SpeechProvider for GeminiLiveProvider {
    fn name(&self) -> &str {
        "gemini-live"
    }

    async fn connect(
        &self,
        system_prompt: &str,
        sink: EventSink,
    ) -> Result<Box<dyn ProviderSession>, VoiceError> {
        if !self.config.has_credential() {
            return Err(VoiceError::Config(
                "speech provider credential is not set".to_string(),
            ));
        }

        let timeout = self.config.connect_timeout();
        let (writer, reader) = tokio::time::timeout(timeout, self.handshake(system_prompt))
            .await
            .map_err(|_| {
                VoiceError::ProviderUnavailable(format!(
                    "setup did not complete within {} seconds",
                    timeout.as_secs()
                ))
            })??;

        tracing::info!(model = %self.config.model, "gemini live session established");

        let reader_task = tokio::spawn(read_loop(reader, sink));

        Ok(Box::new(GeminiSession {
            writer: Mutex::new(writer),
            reader_task,
        }))
    }
}

struct GeminiSession {
    writer: Mutex<WsSink>,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl ProviderSession for GeminiSession {
    async fn send_audio(&self, pcm: &[u8]) -> Result<(), VoiceError> {
        let frame = json!({
            "realtimeInput": {
                "audio": { "data": BASE64.encode(pcm), "mimeType": INPUT_MIME_TYPE }
            }
        });
        self.writer
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), VoiceError> {
        let result = self.writer.lock().await.close().await;
        self.reader_task.abort();
        result.map_err(VoiceError::from)
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Pushes every server event into the sink until the connection ends.
async fn read_loop(mut source: WsSource, sink: EventSink) {
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame {
                    tracing::info!(code = %frame.code, reason = frame.reason.as_str(), "gemini live closed the session");
                }
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "gemini live read failed");
                break;
            }
        };

        let parsed = match parse_server_frame(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable gemini live frame");
                continue;
            }
        };

        for event in parsed.events {
            if !sink.push(event) {
                return;
            }
        }

        if parsed.go_away {
            tracing::info!("gemini live requested disconnect");
            break;
        }
    }
    sink.close();
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineData {
    data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    text: Option<String>,
}

/// What one server frame means to the bridge.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ServerFrame {
    pub setup_complete: bool,
    pub go_away: bool,
    pub events: Vec<SpeechEvent>,
}

/// Decodes one Gemini Live server frame.
///
/// Events come out in the order audio, input transcript, output
/// transcript, interruption.
pub fn parse_server_frame(text: &str) -> Result<ServerFrame, VoiceError> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut frame = ServerFrame {
        setup_complete: message.setup_complete.is_some(),
        go_away: message.go_away.is_some(),
        events: Vec::new(),
    };

    let Some(content) = message.server_content else {
        return Ok(frame);
    };

    if let Some(turn) = content.model_turn {
        for data in turn
            .parts
            .into_iter()
            .filter_map(|p| p.inline_data.and_then(|d| d.data))
        {
            let audio = BASE64
                .decode(data.as_bytes())
                .map_err(|e| VoiceError::Protocol(format!("invalid inline audio: {}", e)))?;
            frame.events.push(SpeechEvent::Audio(audio));
        }
    }

    if let Some(text) = content.input_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            frame.events.push(SpeechEvent::InputTranscript(text));
        }
    }

    if let Some(text) = content.output_transcription.and_then(|t| t.text) {
        if !text.is_empty() {
            frame.events.push(SpeechEvent::OutputTranscript(text));
        }
    }

    if content.interrupted {
        frame.events.push(SpeechEvent::Interrupted);
    }

    Ok(frame)
}
