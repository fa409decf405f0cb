//! Seam between the bridge and a concrete realtime speech provider.
//!
//! A provider opens a session and then delivers events by pushing them into
//! the [`EventSink`] it was handed, from whatever task or callback its
//! transport uses. The bridge turns those pushes into an ordered pull-based
//! sequence.

use crate::bridge::EventSink;
use crate::error::VoiceError;
use async_trait::async_trait;

/// One event delivered by the speech provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Response audio, 16-bit little-endian PCM at 24 kHz mono.
    Audio(Vec<u8>),
    /// Transcription of what the caller said.
    InputTranscript(String),
    /// Transcription of what the speech AI said.
    OutputTranscript(String),
    /// The caller talked over the response; queued playback should be dropped.
    Interrupted,
}

impl SpeechEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Audio(_) => "audio",
            Self::InputTranscript(_) => "input_transcript",
            Self::OutputTranscript(_) => "output_transcript",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Factory for realtime speech sessions.
#[async_trait]
pub trait SpeechProvider: Send + Sync + 'static {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Opens a session performing the given persona.
    ///
    /// Returns once the provider handshake has completed. Events arriving
    /// afterwards must be pushed into `sink`; when the provider connection
    /// ends or fails the provider must call [`EventSink::close`].
    async fn connect(
        &self,
        system_prompt: &str,
        sink: EventSink,
    ) -> Result<Box<dyn ProviderSession>, VoiceError>;
}

/// The send half of an open provider session.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Forwards 16-bit little-endian PCM at 16 kHz mono.
    async fn send_audio(&self, pcm: &[u8]) -> Result<(), VoiceError>;

    /// Releases the provider connection.
    async fn close(&self) -> Result<(), VoiceError>;
}
