//! Process-wide table of active call sessions, keyed by stream id.
//!
//! This is the only state shared across connections. Every other piece of
//! a session (bridge handle, transcript) is reached through the four
//! operations here: `create`, `get`, `append_transcript`, `destroy`.
//!
//! The map sits behind a `std::sync::RwLock`. No guard is held across an
//! `.await`; opening and closing the speech bridge happen outside the lock.

use callbridge_types::{TargetIdentity, TranscriptEntry, TranscriptRole};
use callbridge_voice::{agent_system_prompt, BridgeReceiver, SpeechBridge, SpeechProvider, VoiceError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The speech bridge could not be constructed.
    #[error("speech provider unavailable: {0}")]
    ProviderUnavailable(#[from] VoiceError),

    /// A live session already exists for this stream id.
    #[error("session already active for stream {0}")]
    AlreadyActive(String),
}

/// One active call.
struct CallSession {
    session_id: Uuid,
    call_id: String,
    target: TargetIdentity,
    bridge: Arc<SpeechBridge>,
    transcript: Vec<TranscriptEntry>,
    start_time: DateTime<Utc>,
    started_at: Instant,
    last_media_at: Instant,
}

/// Cheap view of a live session for the connection and receive-loop tasks.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub stream_id: String,
    pub call_id: String,
    pub target: TargetIdentity,
    pub bridge: Arc<SpeechBridge>,
    pub start_time: DateTime<Utc>,
}

/// Final state of a session, taken at destruction.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub stream_id: String,
    pub call_id: String,
    pub target: TargetIdentity,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub transcript: Vec<TranscriptEntry>,
}

/// Operator-facing listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub stream_id: String,
    pub call_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub transcript_len: usize,
    pub started_at: DateTime<Utc>,
    pub age_secs: u64,
}

/// Why the reaper picked a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    MaxDuration,
    Idle,
}

impl ExpiryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxDuration => "max_duration",
            Self::Idle => "idle",
        }
    }
}

pub struct SessionRegistry {
    provider: Arc<dyn SpeechProvider>,
    sessions: RwLock<HashMap<String, CallSession>>,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn SpeechProvider>) -> Self {
        Self {
            provider,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CallSession>> {
        self.sessions.read().unwrap_or_else(|e| {
            tracing::error!("session registry lock poisoned");
            PoisonError::into_inner(e)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CallSession>> {
        self.sessions.write().unwrap_or_else(|e| {
            tracing::error!("session registry lock poisoned");
            PoisonError::into_inner(e)
        })
    }

    /// Opens a speech bridge for the call and registers it under `stream_id`.
    ///
    /// Returns the session handle and the bridge's event receiver, which the
    /// caller must drain for the lifetime of the session.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ProviderUnavailable`] if the bridge cannot be opened;
    /// [`RegistryError::AlreadyActive`] if `stream_id` is already live, in
    /// which case the existing session is left untouched.
    pub async fn create(
        &self,
        stream_id: &str,
        call_id: &str,
        target: TargetIdentity,
    ) -> Result<(SessionHandle, BridgeReceiver), RegistryError> {
        if self.read().contains_key(stream_id) {
            return Err(RegistryError::AlreadyActive(stream_id.to_string()));
        }

        let prompt = agent_system_prompt(&target);
        let (bridge, receiver) = SpeechBridge::connect(self.provider.as_ref(), &prompt).await?;
        let bridge = Arc::new(bridge);

        let now = Instant::now();
        let session = CallSession {
            session_id: Uuid::new_v4(),
            call_id: call_id.to_string(),
            target,
            bridge: bridge.clone(),
            transcript: Vec::new(),
            start_time: Utc::now(),
            started_at: now,
            last_media_at: now,
        };
        let handle = SessionHandle {
            session_id: session.session_id,
            stream_id: stream_id.to_string(),
            call_id: session.call_id.clone(),
            target: session.target.clone(),
            bridge: bridge.clone(),
            start_time: session.start_time,
        };

        let inserted = match self.write().entry(stream_id.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(session);
                true
            }
            Entry::Occupied(_) => false,
        };

        if !inserted {
            // A concurrent create for the same stream won the insert.
            if let Err(e) = bridge.close().await {
                tracing::warn!(stream_id = %stream_id, error = %e, "failed to close duplicate speech bridge");
            }
            return Err(RegistryError::AlreadyActive(stream_id.to_string()));
        }

        tracing::info!(
            stream_id = %stream_id,
            call_id = %handle.call_id,
            agent_id = %handle.target.agent_id,
            agent_name = handle.target.agent_name.as_deref().unwrap_or("unknown"),
            session_id = %handle.session_id,
            provider = handle.bridge.provider(),
            active_sessions = self.len(),
            "created call session"
        );

        Ok((handle, receiver))
    }

    /// Looks up a live session. Absence is normal (media after stop, unknown stream).
    pub fn get(&self, stream_id: &str) -> Option<SessionHandle> {
        self.read().get(stream_id).map(|s| SessionHandle {
            session_id: s.session_id,
            stream_id: stream_id.to_string(),
            call_id: s.call_id.clone(),
            target: s.target.clone(),
            bridge: s.bridge.clone(),
            start_time: s.start_time,
        })
    }

    /// Appends a transcript entry stamped with the current time.
    ///
    /// Returns `false` without doing anything if the session is gone.
    pub fn append_transcript(
        &self,
        stream_id: &str,
        role: TranscriptRole,
        text: impl Into<String>,
    ) -> bool {
        match self.write().get_mut(stream_id) {
            Some(session) => {
                session.transcript.push(TranscriptEntry::now(role, text));
                true
            }
            None => false,
        }
    }

    /// Records that inbound media arrived, for idle expiry.
    pub fn touch_media(&self, stream_id: &str) {
        if let Some(session) = self.write().get_mut(stream_id) {
            session.last_media_at = Instant::now();
        }
    }

    /// Removes the session and closes its bridge.
    ///
    /// Idempotent: returns `None` and touches no bridge if the entry is
    /// already gone. Bridge close errors are logged, not returned.
    pub async fn destroy(&self, stream_id: &str) -> Option<SessionSummary> {
        let removed = self.write().remove(stream_id);
        self.release(stream_id, removed).await
    }

    /// Like [`destroy`](Self::destroy), but only if the live entry is still
    /// the session identified by `session_id`.
    pub async fn destroy_session(&self, stream_id: &str, session_id: Uuid) -> Option<SessionSummary> {
        let removed = {
            let mut sessions = self.write();
            match sessions.get(stream_id) {
                Some(session) if session.session_id == session_id => sessions.remove(stream_id),
                _ => None,
            }
        };
        self.release(stream_id, removed).await
    }

    async fn release(&self, stream_id: &str, removed: Option<CallSession>) -> Option<SessionSummary> {
        let session = removed?;

        if let Err(e) = session.bridge.close().await {
            tracing::warn!(stream_id = %stream_id, error = %e, "error closing speech bridge");
        }

        let summary = SessionSummary {
            session_id: session.session_id,
            stream_id: stream_id.to_string(),
            call_id: session.call_id,
            target: session.target,
            start_time: session.start_time,
            duration: session.started_at.elapsed(),
            transcript: session.transcript,
        };

        tracing::info!(
            stream_id = %stream_id,
            call_id = %summary.call_id,
            transcript_entries = summary.transcript.len(),
            duration_secs = summary.duration.as_secs(),
            active_sessions = self.len(),
            "destroyed call session"
        );

        Some(summary)
    }

    /// Sessions past `max_duration` since start or `idle_timeout` since the
    /// last media frame. A zero duration disables that check.
    pub fn expired(
        &self,
        max_duration: Duration,
        idle_timeout: Duration,
    ) -> Vec<(String, Uuid, ExpiryReason)> {
        self.read()
            .iter()
            .filter_map(|(stream_id, s)| {
                let reason = if !max_duration.is_zero() && s.started_at.elapsed() >= max_duration {
                    ExpiryReason::MaxDuration
                } else if !idle_timeout.is_zero() && s.last_media_at.elapsed() >= idle_timeout {
                    ExpiryReason::Idle
                } else {
                    return None;
                };
                Some((stream_id.clone(), s.session_id, reason))
            })
            .collect()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .read()
            .iter()
            .map(|(stream_id, s)| SessionInfo {
                stream_id: stream_id.clone(),
                call_id: s.call_id.clone(),
                agent_id: s.target.agent_id.clone(),
                agent_name: s.target.agent_name.clone(),
                transcript_len: s.transcript.len(),
                started_at: s.start_time,
                age_secs: s.started_at.elapsed().as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
