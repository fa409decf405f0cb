//! Client for the external evaluation service that scores finished calls.
//!
//! Submission happens once per session at teardown. It is fire-and-forget
//! from the connection's point of view: failures are logged and never
//! retried.

use crate::registry::SessionSummary;
use callbridge_types::TranscriptRole;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const EVALUATE_PATH: &str = "/api/evaluate";

/// Longest response body kept in an error for logging.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("evaluation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("evaluation service returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Body of `POST /api/evaluate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub task_description: String,
    pub call_uuid: String,
    pub duration_seconds: u64,
    pub transcript: Vec<EvaluationTurn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationTurn {
    pub role: TranscriptRole,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl EvaluationRequest {
    pub fn from_summary(summary: &SessionSummary) -> Self {
        Self {
            kind: "voice",
            task_description: format!(
                "Voice evaluation conversation for {}",
                summary.target.label()
            ),
            call_uuid: summary.call_id.clone(),
            duration_seconds: rounded_secs(summary.duration),
            transcript: summary
                .transcript
                .iter()
                .map(|entry| EvaluationTurn {
                    role: entry.role,
                    text: entry.text.clone(),
                    timestamp: entry.timestamp_millis(),
                })
                .collect(),
        }
    }
}

fn rounded_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    ((millis + 500) / 1000) as u64
}

#[derive(Debug, Clone)]
pub struct EvaluationClient {
    http: reqwest::Client,
    endpoint: String,
}

impl EvaluationClient {
    /// Builds a client posting to `<base_url>/api/evaluate`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EvaluationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("callbridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), EVALUATE_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts one evaluation request.
    ///
    /// # Errors
    ///
    /// [`EvaluationError::Http`] on transport failure,
    /// [`EvaluationError::Status`] on a non-2xx response.
    pub async fn submit(&self, request: &EvaluationRequest) -> Result<(), EvaluationError> {
        let response = self.http.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(EvaluationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Submits the session's transcript and logs the outcome.
    pub async fn submit_summary(&self, summary: &SessionSummary) {
        let request = EvaluationRequest::from_summary(summary);
        match self.submit(&request).await {
            Ok(()) => tracing::info!(
                stream_id = %summary.stream_id,
                call_id = %summary.call_id,
                transcript_entries = request.transcript.len(),
                "submitted transcript for evaluation"
            ),
            Err(EvaluationError::Status { status, body }) => tracing::error!(
                stream_id = %summary.stream_id,
                call_id = %summary.call_id,
                status,
                body = %body,
                "evaluation service rejected transcript"
            ),
            Err(e) => tracing::error!(
                stream_id = %summary.stream_id,
                call_id = %summary.call_id,
                error = %e,
                "failed to submit transcript for evaluation"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_types::{TargetIdentity, TranscriptEntry};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn summary(target: TargetIdentity, duration: Duration) -> SessionSummary {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        SessionSummary {
            session_id: Uuid::new_v4(),
            stream_id: "s1".to_string(),
            call_id: "c1".to_string(),
            target,
            start_time: at,
            duration,
            transcript: vec![
                TranscriptEntry {
                    role: TranscriptRole::User,
                    text: "hi".to_string(),
                    timestamp: at,
                },
                TranscriptEntry {
                    role: TranscriptRole::Agent,
                    text: "hello, how can I help?".to_string(),
                    timestamp: at,
                },
            ],
        }
    }

    #[test]
    fn payload_wire_shape() {
        let request = EvaluationRequest::from_summary(&summary(
            TargetIdentity::new("a1", Some("Acme Support".to_string())),
            Duration::from_millis(12_400),
        ));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "type": "voice",
                "task_description": "Voice evaluation conversation for Acme Support",
                "call_uuid": "c1",
                "duration_seconds": 12,
                "transcript": [
                    {"role": "user", "text": "hi", "timestamp": 1_700_000_000_123i64},
                    {"role": "agent", "text": "hello, how can I help?", "timestamp": 1_700_000_000_123i64}
                ]
            })
        );
    }

    #[test]
    fn unnamed_target_is_described_by_id() {
        let request = EvaluationRequest::from_summary(&summary(
            TargetIdentity::new("a1", None),
            Duration::ZERO,
        ));
        assert_eq!(
            request.task_description,
            "Voice evaluation conversation for agent a1"
        );
    }

    #[test]
    fn duration_rounds_to_nearest_second() {
        assert_eq!(rounded_secs(Duration::from_millis(499)), 0);
        assert_eq!(rounded_secs(Duration::from_millis(500)), 1);
        assert_eq!(rounded_secs(Duration::from_millis(61_700)), 62);
    }

    #[test]
    fn endpoint_joins_base_url() {
        let client = EvaluationClient::new("http://litmus.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(), "http://litmus.local/api/evaluate");
    }
}
