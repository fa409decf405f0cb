//! Shared data model for the call relay.
//!
//! Every crate in the workspace that needs to talk about a call's
//! transcript or the agent being evaluated depends on this crate and
//! nothing else for those definitions. It performs no I/O.

pub mod transcript;

use serde::{Deserialize, Serialize};

pub use transcript::{TranscriptEntry, TranscriptRole};

/// Agent identifier used when a connection does not name its target.
pub const UNKNOWN_AGENT_ID: &str = "unknown";

/// The agent under evaluation on a call.
///
/// Supplied by the telephony side as connection query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    /// Opaque agent identifier.
    pub agent_id: String,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

impl TargetIdentity {
    pub fn new(agent_id: impl Into<String>, agent_name: Option<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.filter(|name| !name.trim().is_empty()),
        }
    }

    /// Returns the display name if set, otherwise `agent <id>`.
    pub fn label(&self) -> String {
        match &self.agent_name {
            Some(name) => name.clone(),
            None => format!("agent {}", self.agent_id),
        }
    }
}

impl Default for TargetIdentity {
    fn default() -> Self {
        Self::new(UNKNOWN_AGENT_ID, None)
    }
}
