//! Shared fixtures: a scripted speech provider, server spawning, and an
//! in-process evaluation endpoint that records what it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{routing::post, Extension, Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use callbridge_server::evaluation::EvaluationClient;
use callbridge_server::{app, AppState};
use callbridge_voice::{EventSink, ProviderSession, SpeechEvent, SpeechProvider, VoiceError};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// One provider session opened by [`ScriptedProvider`].
pub struct RecordedSession {
    pub system_prompt: String,
    sink: EventSink,
    sent: Mutex<Vec<Vec<u8>>>,
    closes: AtomicUsize,
}

impl RecordedSession {
    pub fn emit(&self, event: SpeechEvent) -> bool {
        self.sink.push(event)
    }

    /// Simulates the provider ending the session.
    pub fn end(&self) {
        self.sink.close();
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct RecordedProviderSession {
    speech: Arc<RecordedSession>,
}

#[async_trait]
impl ProviderSession for RecordedProviderSession {
    async fn send_audio(&self, pcm: &[u8]) -> Result<(), VoiceError> {
        self.speech.sent.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), VoiceError> {
        self.speech.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-process provider that records every session and call.
#[derive(Default)]
pub struct ScriptedProvider {
    sessions: Mutex<Vec<Arc<RecordedSession>>>,
    connects: AtomicUsize,
    fail: AtomicBool,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes subsequent connects fail until reset.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of connect attempts, failed ones included.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<RecordedSession>> {
        self.sessions.lock().unwrap().clone()
    }

    /// Waits until the `index`-th successful session exists.
    pub async fn session(&self, index: usize) -> Arc<RecordedSession> {
        for _ in 0..200 {
            if let Some(speech) = self.sessions.lock().unwrap().get(index).cloned() {
                return speech;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("provider session {index} was never opened");
    }
}

#[async_trait]
impl SpeechProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(
        &self,
        system_prompt: &str,
        sink: EventSink,
    ) -> Result<Box<dyn ProviderSession>, VoiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::ProviderUnavailable("scripted failure".to_string()));
        }
        let speech = Arc::new(RecordedSession {
            system_prompt: system_prompt.to_string(),
            sink,
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        self.sessions.lock().unwrap().push(speech.clone());
        Ok(Box::new(RecordedProviderSession { speech }))
    }
}

pub fn state(provider: Arc<ScriptedProvider>, evaluation: Option<EvaluationClient>) -> Arc<AppState> {
    Arc::new(AppState::new(provider, evaluation))
}

/// Serves the full router on an ephemeral port.
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Serves `POST /api/evaluate` and forwards each body to the returned receiver.
pub async fn spawn_evaluation_sink() -> (EvaluationClient, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel::<Value>();

    async fn evaluate(
        Extension(tx): Extension<mpsc::UnboundedSender<Value>>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let _ = tx.send(body);
        Json(json!({"status": "accepted"}))
    }

    let router = Router::new()
        .route("/api/evaluate", post(evaluate))
        .layer(Extension(tx));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client =
        EvaluationClient::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    (client, rx)
}

pub fn start_envelope(stream_id: &str, call_id: &str) -> String {
    json!({
        "event": "start",
        "start": {
            "streamId": stream_id,
            "callId": call_id,
            "accountId": "acct",
            "from": "+15550001",
            "to": "+15550002",
            "codec": "PCMU"
        }
    })
    .to_string()
}

pub fn media_envelope(stream_id: &str, mulaw: &[u8]) -> String {
    json!({
        "event": "media",
        "streamId": stream_id,
        "media": {
            "contentType": "audio/x-mulaw",
            "sampleRate": 8000,
            "payload": STANDARD.encode(mulaw),
            "timestamp": "0"
        }
    })
    .to_string()
}

pub fn stop_envelope(stream_id: &str) -> String {
    json!({"event": "stop", "streamId": stream_id}).to_string()
}

/// 24 kHz PCM holding `samples` copies of `value`.
pub fn pcm24k(value: i16, samples: usize) -> Vec<u8> {
    std::iter::repeat(value)
        .take(samples)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
