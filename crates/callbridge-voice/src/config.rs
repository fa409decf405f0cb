use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default realtime model with native audio in and out.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice for the agent persona.
pub const DEFAULT_GEMINI_VOICE: &str = "Kore";

/// Bidirectional streaming endpoint of the Gemini Live API.
pub const DEFAULT_GEMINI_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_voice() -> String {
    DEFAULT_GEMINI_VOICE.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_GEMINI_ENDPOINT.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Provider credential. Empty means speech sessions cannot be opened.
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// WebSocket endpoint; the credential is appended as the `key` query parameter.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Upper bound on the connect + setup handshake, in seconds. Default: 10.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            voice: default_voice(),
            endpoint: default_endpoint(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("endpoint", &self.endpoint)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl SpeechConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_credential() {
        let config = SpeechConfig::new("super-secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn blank_credential_is_not_usable() {
        assert!(!SpeechConfig::new("  ").has_credential());
        assert!(SpeechConfig::new("k").has_credential());
    }

    #[test]
    fn zero_timeout_is_raised_to_one_second() {
        let config = SpeechConfig {
            connect_timeout_secs: 0,
            ..SpeechConfig::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
    }
}
