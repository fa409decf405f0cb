//! Pull-based wrapper around a push-driven realtime speech session.
//!
//! [`SpeechBridge`] is the send side and owns the provider session.
//! [`BridgeReceiver`] is the single consumer of provider events. Both share a
//! queue guarded by a short-lived mutex plus a [`Notify`] wakeup; the mutex is
//! never held across an `.await`.
//!
//! State machine: `Connecting -> Open -> Closed`. `Closed` is terminal and is
//! reached on explicit close, or when the provider closes the sink after an
//! error or end of stream. Once closed, sends are rejected and the receiver
//! yields whatever was already queued and then `None`.

use crate::error::VoiceError;
use crate::provider::{ProviderSession, SpeechEvent, SpeechProvider};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Open,
    Closed,
}

struct Inner {
    state: BridgeState,
    queue: VecDeque<SpeechEvent>,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Shared {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BridgeState::Connecting,
                queue: VecDeque::new(),
            }),
            notify: Notify::new(),
        }
    }

    // Queue operations cannot leave `Inner` half-updated, so a poisoned
    // lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> BridgeState {
        self.lock().state
    }

    /// Moves `Connecting -> Open`. Returns `false` if already closed.
    fn open(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BridgeState::Connecting => {
                inner.state = BridgeState::Open;
                true
            }
            BridgeState::Open => true,
            BridgeState::Closed => false,
        }
    }

    /// Moves to `Closed` and wakes the receiver. Returns `true` on the first call.
    fn close(&self) -> bool {
        let was_open = {
            let mut inner = self.lock();
            let was_open = inner.state != BridgeState::Closed;
            inner.state = BridgeState::Closed;
            was_open
        };
        self.notify.notify_one();
        was_open
    }
}

/// Callback side of the bridge, handed to the provider.
#[derive(Clone)]
pub struct EventSink {
    shared: Arc<Shared>,
}

impl EventSink {
    /// Queues an event in arrival order. Returns `false` (and drops the
    /// event) if the bridge is already closed.
    pub fn push(&self, event: SpeechEvent) -> bool {
        {
            let mut inner = self.shared.lock();
            if inner.state == BridgeState::Closed {
                return false;
            }
            inner.queue.push_back(event);
        }
        self.shared.notify.notify_one();
        true
    }

    /// Signals that the provider connection has ended.
    pub fn close(&self) {
        if self.shared.close() {
            tracing::debug!("speech provider closed the session");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state() == BridgeState::Closed
    }
}

/// Exclusive consumer of a bridge's outbound events.
pub struct BridgeReceiver {
    shared: Arc<Shared>,
}

impl BridgeReceiver {
    /// Waits for the next event.
    ///
    /// Returns `None` once the bridge is closed and every event queued
    /// before the close has been returned.
    pub async fn next(&mut self) -> Option<SpeechEvent> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.shared.lock();
                if let Some(event) = inner.queue.pop_front() {
                    return Some(event);
                }
                if inner.state == BridgeState::Closed {
                    return None;
                }
            }

            notified.await;
        }
    }
}

impl std::fmt::Debug for BridgeReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("BridgeReceiver")
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .finish()
    }
}

/// A live speech-AI session.
///
/// `send` may run concurrently with the receiver draining events, but must
/// not be called concurrently with itself.
pub struct SpeechBridge {
    provider: String,
    session: Box<dyn ProviderSession>,
    shared: Arc<Shared>,
    released: AtomicBool,
}

impl SpeechBridge {
    /// Opens a provider session and returns the bridge plus its receiver.
    ///
    /// # Errors
    ///
    /// Any failure to construct the session is reported as
    /// [`VoiceError::ProviderUnavailable`].
    pub async fn connect(
        provider: &dyn SpeechProvider,
        system_prompt: &str,
    ) -> Result<(Self, BridgeReceiver), VoiceError> {
        let shared = Arc::new(Shared::new());
        let sink = EventSink {
            shared: shared.clone(),
        };

        let session = provider
            .connect(system_prompt, sink)
            .await
            .map_err(|e| match e {
                VoiceError::ProviderUnavailable(_) => e,
                other => VoiceError::ProviderUnavailable(other.to_string()),
            })?;

        if !shared.open() {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "closing session that ended during handshake");
            }
            return Err(VoiceError::ProviderUnavailable(format!(
                "{} closed the session during the handshake",
                provider.name()
            )));
        }

        tracing::debug!(provider = provider.name(), "speech bridge open");

        let bridge = Self {
            provider: provider.name().to_string(),
            session,
            shared: shared.clone(),
            released: AtomicBool::new(false),
        };
        Ok((bridge, BridgeReceiver { shared }))
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn state(&self) -> BridgeState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == BridgeState::Open
    }

    /// Forwards 16 kHz PCM audio to the provider.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::Closed`] once the bridge is closed, or the
    /// provider's error if the send itself fails.
    pub async fn send(&self, pcm: &[u8]) -> Result<(), VoiceError> {
        if !self.is_open() {
            return Err(VoiceError::Closed);
        }
        self.session.send_audio(pcm).await
    }

    /// Closes the bridge. Idempotent; the provider session is released on
    /// the first call only.
    pub async fn close(&self) -> Result<(), VoiceError> {
        self.shared.close();
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.session.close().await
    }
}

impl Drop for SpeechBridge {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for SpeechBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechBridge")
            .field("provider", &self.provider)
            .field("state", &self.state())
            .finish()
    }
}
