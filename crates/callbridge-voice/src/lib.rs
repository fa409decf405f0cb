//! Speech side of the call relay.
//!
//! Converts telephony audio to and from the formats a realtime speech AI
//! works in, and wraps a provider's push-driven session in a
//! [`SpeechBridge`] with a pull-based [`BridgeReceiver`].
//!
//! The telephony leg carries 8 kHz mu-law; the speech AI takes 16 kHz PCM
//! and answers with 24 kHz PCM. See [`codec`] for the conversions and
//! [`gemini`] for the production provider.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod gemini;
pub mod prompt;
pub mod provider;

pub use bridge::{BridgeReceiver, BridgeState, EventSink, SpeechBridge};
pub use config::{SpeechConfig, DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_VOICE};
pub use error::VoiceError;
pub use gemini::GeminiLiveProvider;
pub use prompt::agent_system_prompt;
pub use provider::{ProviderSession, SpeechEvent, SpeechProvider};
