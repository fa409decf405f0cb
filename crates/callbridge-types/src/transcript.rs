//! Transcript entries collected during a call.
//!
//! A transcript is append-only. Entries are kept in arrival order, which is
//! not guaranteed to be conversational turn order: user and agent
//! transcription events can race each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who spoke a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// The caller (the person or system dialing in).
    User,
    /// The speech AI performing the agent persona.
    Agent,
}

impl TranscriptRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript fragment with its server-assigned timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Creates an entry stamped with the current time.
    pub fn now(role: TranscriptRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Timestamp as milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&TranscriptRole::Agent).unwrap();
        assert_eq!(json, "\"agent\"");
        let role: TranscriptRole = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, TranscriptRole::User);
    }

    #[test]
    fn entry_timestamp_millis_matches_datetime() {
        let entry = TranscriptEntry::now(TranscriptRole::User, "hello");
        assert_eq!(entry.timestamp_millis(), entry.timestamp.timestamp_millis());
        assert_eq!(entry.text, "hello");
    }
}
