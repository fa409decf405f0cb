//! JSON envelopes exchanged with the telephony provider over the stream socket.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use callbridge_voice::codec::TELEPHONY_SAMPLE_RATE;
use serde::{Deserialize, Serialize};

/// Content type of telephony audio in both directions.
pub const MULAW_CONTENT_TYPE: &str = "audio/x-mulaw";

/// Messages received from the telephony provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum InboundEnvelope {
    /// A duplex audio stream was connected.
    Start { start: StartPayload },
    /// One chunk of caller audio.
    Media {
        #[serde(rename = "streamId")]
        stream_id: String,
        media: MediaPayload,
    },
    /// The stream is finished.
    Stop {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    /// Any other event kind. Logged and ignored.
    #[serde(other)]
    Unknown,
}

impl InboundEnvelope {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Media { .. } => "media",
            Self::Stop { .. } => "stop",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub stream_id: String,
    pub call_id: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// Base64-encoded mu-law audio.
    pub payload: String,
    /// Provider timestamp; its format varies by provider, so it is kept opaque.
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

impl MediaPayload {
    pub fn decode_audio(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.payload.as_bytes())
    }
}

/// Messages sent to the telephony provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OutboundEnvelope {
    /// Audio for the caller to hear.
    PlayAudio { media: PlayAudioMedia },
    /// Discard any audio queued for playback.
    ClearAudio {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayAudioMedia {
    pub content_type: &'static str,
    pub sample_rate: u32,
    pub payload: String,
}

impl OutboundEnvelope {
    /// Wraps 8 kHz mu-law bytes in a `playAudio` envelope.
    pub fn play_audio(mulaw: &[u8]) -> Self {
        Self::PlayAudio {
            media: PlayAudioMedia {
                content_type: MULAW_CONTENT_TYPE,
                sample_rate: TELEPHONY_SAMPLE_RATE,
                payload: STANDARD.encode(mulaw),
            },
        }
    }

    pub fn clear_audio(stream_id: impl Into<String>) -> Self {
        Self::ClearAudio {
            stream_id: stream_id.into(),
        }
    }
}
