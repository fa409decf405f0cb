use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Speech provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Speech session is closed")]
    Closed,

    #[error("Speech provider protocol error: {0}")]
    Protocol(String),

    #[error("Speech provider transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}
