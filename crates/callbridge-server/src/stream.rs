//! Stream protocol handler: one task per telephony connection.
//!
//! Each connection moves `Idle -> Streaming -> Terminated`. A `start`
//! envelope creates a call session and spawns its receive loop, `media`
//! envelopes are converted and fed into the session's speech bridge, and
//! `stop` (or the socket closing) tears the session down and submits its
//! transcript. Malformed envelopes are logged and dropped; nothing here ever
//! closes the connection in response to bad input.

use crate::envelope::{InboundEnvelope, MediaPayload, OutboundEnvelope, StartPayload};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension, Query,
    },
    response::IntoResponse,
};
use callbridge_types::{TargetIdentity, TranscriptRole, UNKNOWN_AGENT_ID};
use callbridge_voice::{codec, BridgeReceiver, SpeechEvent, VoiceError};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound frames buffered per connection before the receive loop waits.
const OUTBOUND_BUFFER: usize = 256;

/// Query parameters on the stream socket.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
}

impl StreamParams {
    pub fn into_target(self) -> TargetIdentity {
        let agent_id = self
            .agent_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_AGENT_ID.to_string());
        TargetIdentity::new(agent_id, self.agent_name)
    }
}

/// Upgrades the telephony provider's connection.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    if params.agent_id.is_none() {
        tracing::warn!(remote_addr = %addr, "stream connected without agent_id");
    }
    let target = params.into_target();
    tracing::info!(
        remote_addr = %addr,
        agent_id = %target.agent_id,
        agent_name = target.agent_name.as_deref().unwrap_or("unknown"),
        "telephony stream connected"
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, target))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, target: TargetIdentity) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut connection = StreamConnection::new(state, target, tx);

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => connection.handle_text(text.as_str()).await,
            AxumMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => connection.handle_text(text).await,
                Err(_) => tracing::warn!(len = bytes.len(), "ignoring non-UTF-8 binary frame"),
            },
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    connection.close().await;
    send_task.abort();
    tracing::info!("telephony stream disconnected");
}

/// Per-connection protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Streaming { stream_id: String, session_id: Uuid },
    Terminated,
}

/// Protocol state machine for one telephony connection.
///
/// Outbound envelopes are written as serialized JSON into `outbound`; the
/// socket writer drains that channel.
pub struct StreamConnection {
    state: Arc<AppState>,
    target: TargetIdentity,
    outbound: mpsc::Sender<String>,
    conn: ConnectionState,
}

impl StreamConnection {
    pub fn new(state: Arc<AppState>, target: TargetIdentity, outbound: mpsc::Sender<String>) -> Self {
        Self {
            state,
            target,
            outbound,
            conn: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.conn
    }

    /// Handles one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) {
        let envelope = match serde_json::from_str::<InboundEnvelope>(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed envelope");
                return;
            }
        };
        self.handle_envelope(envelope).await;
    }

    pub async fn handle_envelope(&mut self, envelope: InboundEnvelope) {
        if self.conn == ConnectionState::Terminated {
            tracing::warn!(event = envelope.kind(), "envelope after stream terminated, ignoring");
            return;
        }

        match envelope {
            InboundEnvelope::Start { start } => self.on_start(start).await,
            InboundEnvelope::Media { stream_id, media } => self.on_media(&stream_id, &media).await,
            InboundEnvelope::Stop { stream_id } => self.on_stop(&stream_id).await,
            InboundEnvelope::Unknown => tracing::debug!("ignoring unrecognized envelope event"),
        }
    }

    async fn on_start(&mut self, start: StartPayload) {
        if let ConnectionState::Streaming { stream_id, .. } = &self.conn {
            tracing::warn!(
                active_stream_id = %stream_id,
                stream_id = %start.stream_id,
                "start received while already streaming, ignoring"
            );
            return;
        }

        tracing::info!(
            stream_id = %start.stream_id,
            call_id = %start.call_id,
            account_id = start.account_id.as_deref().unwrap_or(""),
            from = start.from.as_deref().unwrap_or(""),
            to = start.to.as_deref().unwrap_or(""),
            codec = start.codec.as_deref().unwrap_or(""),
            "stream started"
        );

        let created = self
            .state
            .registry
            .create(&start.stream_id, &start.call_id, self.target.clone())
            .await;

        match created {
            Ok((handle, receiver)) => {
                tokio::spawn(receive_loop(
                    self.state.clone(),
                    handle.stream_id.clone(),
                    handle.session_id,
                    receiver,
                    self.outbound.clone(),
                ));
                self.conn = ConnectionState::Streaming {
                    stream_id: handle.stream_id,
                    session_id: handle.session_id,
                };
            }
            Err(e) => {
                tracing::error!(
                    stream_id = %start.stream_id,
                    call_id = %start.call_id,
                    error = %e,
                    "failed to create call session"
                );
            }
        }
    }

    async fn on_media(&mut self, stream_id: &str, media: &MediaPayload) {
        let own = match &self.conn {
            ConnectionState::Streaming { stream_id: own, .. } => own,
            _ => {
                tracing::warn!(stream_id = %stream_id, "media before start, dropping");
                return;
            }
        };
        if own != stream_id {
            tracing::warn!(
                stream_id = %stream_id,
                active_stream_id = %own,
                "media names a stream this connection does not own, dropping"
            );
            return;
        }

        let Some(session) = self.state.registry.get(stream_id) else {
            tracing::warn!(stream_id = %stream_id, "media for ended session, dropping");
            return;
        };

        let mulaw = match media.decode_audio() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(stream_id = %stream_id, error = %e, "media payload is not valid base64");
                return;
            }
        };
        if mulaw.is_empty() {
            return;
        }

        self.state.registry.touch_media(stream_id);
        let pcm = codec::decode_and_upsample(&mulaw);

        match session.bridge.send(&pcm).await {
            Ok(()) => {}
            Err(VoiceError::Closed) => {
                tracing::debug!(stream_id = %stream_id, "speech bridge closed, dropping media");
            }
            Err(e) => {
                tracing::warn!(
                    stream_id = %stream_id,
                    provider = session.bridge.provider(),
                    error = %e,
                    "failed to forward audio to speech provider"
                );
            }
        }
    }

    async fn on_stop(&mut self, stream_id: &str) {
        if let ConnectionState::Streaming { stream_id: own, .. } = &self.conn {
            if own != stream_id {
                tracing::warn!(
                    stream_id = %stream_id,
                    active_stream_id = %own,
                    "stop names a stream this connection does not own, ignoring"
                );
                return;
            }
        }

        tracing::info!(stream_id = %stream_id, "stream stopped");
        let previous = std::mem::replace(&mut self.conn, ConnectionState::Terminated);
        if let ConnectionState::Streaming {
            stream_id,
            session_id,
        } = previous
        {
            teardown(&self.state, &stream_id, session_id).await;
        }
    }

    /// Handles the underlying connection closing.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.conn, ConnectionState::Terminated);
        if let ConnectionState::Streaming {
            stream_id,
            session_id,
        } = previous
        {
            tracing::info!(stream_id = %stream_id, "connection closed while streaming");
            teardown(&self.state, &stream_id, session_id).await;
        }
    }
}

/// Destroys the session and, if it had a transcript, submits it for
/// evaluation in the background.
///
/// Only the exact session `session_id` is destroyed, never a newer one
/// registered under the same stream id. Only the caller that actually
/// removes the session submits.
pub async fn teardown(state: &AppState, stream_id: &str, session_id: Uuid) {
    let Some(summary) = state.registry.destroy_session(stream_id, session_id).await else {
        return;
    };

    if summary.transcript.is_empty() {
        tracing::debug!(stream_id = %stream_id, "empty transcript, nothing to submit");
        return;
    }

    match &state.evaluation {
        Some(client) => {
            let client = client.clone();
            tokio::spawn(async move {
                client.submit_summary(&summary).await;
            });
        }
        None => tracing::warn!(
            stream_id = %stream_id,
            transcript_entries = summary.transcript.len(),
            "evaluation endpoint not configured, discarding transcript"
        ),
    }
}

/// Drains the session's speech bridge for its whole lifetime.
///
/// Audio goes back to the caller as `playAudio`, interruptions as
/// `clearAudio`, and transcription into the session transcript in drain
/// order. Ends when the bridge closes or the connection goes away.
async fn receive_loop(
    state: Arc<AppState>,
    stream_id: String,
    session_id: Uuid,
    mut receiver: BridgeReceiver,
    outbound: mpsc::Sender<String>,
) {
    tracing::debug!(stream_id = %stream_id, "receive loop started");

    while let Some(event) = receiver.next().await {
        tracing::trace!(stream_id = %stream_id, event = event.kind(), "speech event");
        match event {
            SpeechEvent::Audio(pcm) => {
                let mulaw = codec::downsample_and_encode(&pcm);
                if mulaw.is_empty() {
                    continue;
                }
                if !send_envelope(&outbound, &OutboundEnvelope::play_audio(&mulaw)).await {
                    tracing::info!(stream_id = %stream_id, "connection closed, ending receive loop");
                    return;
                }
            }
            SpeechEvent::InputTranscript(text) => {
                tracing::debug!(stream_id = %stream_id, role = "user", text = %text, "transcript");
                state
                    .registry
                    .append_transcript(&stream_id, TranscriptRole::User, text);
            }
            SpeechEvent::OutputTranscript(text) => {
                tracing::debug!(stream_id = %stream_id, role = "agent", text = %text, "transcript");
                state
                    .registry
                    .append_transcript(&stream_id, TranscriptRole::Agent, text);
            }
            SpeechEvent::Interrupted => {
                tracing::debug!(stream_id = %stream_id, "caller interrupted, clearing playback");
                if !send_envelope(&outbound, &OutboundEnvelope::clear_audio(stream_id.as_str())).await {
                    tracing::info!(stream_id = %stream_id, "connection closed, ending receive loop");
                    return;
                }
            }
        }
    }

    tracing::debug!(stream_id = %stream_id, "speech bridge closed, ending receive loop");
    // No-op if stop or connection close already tore the session down.
    teardown(&state, &stream_id, session_id).await;
}

/// Returns `false` once the connection is gone.
async fn send_envelope(outbound: &mpsc::Sender<String>, envelope: &OutboundEnvelope) -> bool {
    if outbound.is_closed() {
        return false;
    }
    match serde_json::to_string(envelope) {
        Ok(json) => outbound.send(json).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize outbound envelope");
            true
        }
    }
}
