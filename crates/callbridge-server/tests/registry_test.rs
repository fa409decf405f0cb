//! Session registry lifecycle and the reaper built on it.

mod common;

use callbridge_server::background::reap_expired;
use callbridge_server::config::SessionLimits;
use callbridge_server::registry::{ExpiryReason, RegistryError, SessionRegistry};
use callbridge_types::{TargetIdentity, TranscriptRole};
use common::{state, ScriptedProvider};
use std::sync::Arc;
use std::time::Duration;

fn target() -> TargetIdentity {
    TargetIdentity::new("a1", None)
}

#[tokio::test]
async fn destroy_twice_is_idempotent() {
    let provider = ScriptedProvider::new();
    let registry = SessionRegistry::new(provider.clone());

    let (handle, _receiver) = registry.create("s1", "c1", target()).await.unwrap();
    assert_eq!(handle.stream_id, "s1");
    assert_eq!(handle.call_id, "c1");

    let first = registry.destroy("s1").await;
    let second = registry.destroy("s1").await;

    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(provider.session(0).await.closes(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn destroy_unknown_stream_is_a_no_op() {
    let registry = SessionRegistry::new(ScriptedProvider::new());
    assert!(registry.destroy("never-created").await.is_none());
}

#[tokio::test]
async fn create_failure_registers_nothing() {
    let provider = ScriptedProvider::new();
    provider.set_failing(true);
    let registry = SessionRegistry::new(provider.clone());

    let err = registry.create("s2", "c2", target()).await.unwrap_err();
    assert!(matches!(err, RegistryError::ProviderUnavailable(_)));
    assert!(registry.get("s2").is_none());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn duplicate_stream_id_is_rejected() {
    let provider = ScriptedProvider::new();
    let registry = SessionRegistry::new(provider.clone());

    let (first, _rx) = registry.create("s1", "c1", target()).await.unwrap();
    let err = registry.create("s1", "c-other", target()).await.unwrap_err();

    assert!(matches!(err, RegistryError::AlreadyActive(ref id) if id == "s1"));
    assert_eq!(provider.connects(), 1);
    assert_eq!(registry.get("s1").unwrap().session_id, first.session_id);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn append_after_destroy_is_dropped() {
    let registry = SessionRegistry::new(ScriptedProvider::new());
    let (_handle, _rx) = registry.create("s1", "c1", target()).await.unwrap();

    assert!(registry.append_transcript("s1", TranscriptRole::User, "hello"));
    let summary = registry.destroy("s1").await.unwrap();
    assert!(!registry.append_transcript("s1", TranscriptRole::Agent, "too late"));

    assert_eq!(summary.transcript.len(), 1);
    assert_eq!(summary.transcript[0].text, "hello");
}

#[tokio::test]
async fn guarded_destroy_spares_a_newer_session() {
    let provider = ScriptedProvider::new();
    let registry = SessionRegistry::new(provider.clone());

    let (old, _rx) = registry.create("s1", "c1", target()).await.unwrap();
    registry.destroy("s1").await.unwrap();
    let (new, _rx2) = registry.create("s1", "c2", target()).await.unwrap();

    assert!(registry.destroy_session("s1", old.session_id).await.is_none());
    assert!(registry.get("s1").is_some());

    let summary = registry.destroy_session("s1", new.session_id).await.unwrap();
    assert_eq!(summary.call_id, "c2");
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let provider = ScriptedProvider::new();
    let registry = Arc::new(SessionRegistry::new(provider.clone()));

    let mut tasks = Vec::new();
    for i in 0..20 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let stream_id = format!("s{i}");
            let (_handle, _rx) = registry
                .create(&stream_id, "c", target())
                .await
                .expect("create should succeed");
            registry.append_transcript(&stream_id, TranscriptRole::User, stream_id.clone());
            registry.destroy(&stream_id).await.expect("destroy should find the session")
        }));
    }

    for task in tasks {
        let summary = task.await.expect("task should not panic");
        assert_eq!(summary.transcript.len(), 1);
        assert_eq!(summary.transcript[0].text, summary.stream_id);
    }
    assert!(registry.is_empty());
    assert!(provider.sessions().iter().all(|p| p.closes() == 1));
}

#[tokio::test]
async fn list_reports_active_sessions() {
    let registry = SessionRegistry::new(ScriptedProvider::new());
    let (_a, _ra) = registry
        .create("sA", "cA", TargetIdentity::new("a1", Some("Acme".to_string())))
        .await
        .unwrap();
    registry.append_transcript("sA", TranscriptRole::Agent, "hello");

    let sessions = registry.list();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].stream_id, "sA");
    assert_eq!(sessions[0].call_id, "cA");
    assert_eq!(sessions[0].agent_name.as_deref(), Some("Acme"));
    assert_eq!(sessions[0].transcript_len, 1);
}

#[tokio::test]
async fn expired_honours_each_limit() {
    let registry = SessionRegistry::new(ScriptedProvider::new());
    let (_h, _rx) = registry.create("s1", "c1", target()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(registry.expired(Duration::ZERO, Duration::ZERO).is_empty());
    assert!(registry
        .expired(Duration::from_secs(60), Duration::from_secs(60))
        .is_empty());

    let by_age = registry.expired(Duration::from_millis(5), Duration::ZERO);
    assert_eq!(by_age.len(), 1);
    assert_eq!(by_age[0].2, ExpiryReason::MaxDuration);

    let by_idle = registry.expired(Duration::ZERO, Duration::from_millis(5));
    assert_eq!(by_idle[0].2, ExpiryReason::Idle);

    registry.touch_media("s1");
    assert!(registry
        .expired(Duration::ZERO, Duration::from_millis(15))
        .is_empty());
}

#[tokio::test]
async fn reaper_destroys_idle_sessions() {
    let provider = ScriptedProvider::new();
    let state = state(provider.clone(), None);
    let (_h, _rx) = state.registry.create("s1", "c1", target()).await.unwrap();

    let limits = SessionLimits {
        max_duration_secs: 0,
        idle_timeout_secs: 1,
        sweep_interval_secs: 1,
    };
    assert_eq!(reap_expired(&state, &limits).await, 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(reap_expired(&state, &limits).await, 1);
    assert!(state.registry.is_empty());
    assert_eq!(provider.session(0).await.closes(), 1);
}
