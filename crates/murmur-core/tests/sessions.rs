//! Session manager scenarios: delivery, rehydration, outbound routing,
//! cancellation, idle sweeping.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use common::{ScriptBackend, build_runtime, no_metadata, text_step};
use murmur_core::channel::{ChannelSettings, InboundMessage, OutboundChannel, SendOptions};
use murmur_core::config::RuntimeConfig;
use murmur_core::session::SessionManager;
use murmur_core::{AgentError, ProcessOutcome};
use murmur_kernel::EventKind;

// ---------------------------------------------------------------------------
// Recording channel
// ---------------------------------------------------------------------------

struct RecordingChannel {
    tag: String,
    allow_acks: bool,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    fn new(tag: &str, allow_acks: bool) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.to_owned(),
            allow_acks,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    fn channel_tag(&self) -> &str {
        &self.tag
    }

    fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            allow_acks: self.allow_acks,
        }
    }

    async fn send(
        &self,
        conversation_id: &str,
        text: &str,
        _opts: &SendOptions,
    ) -> murmur_core::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_owned(), text.to_owned()));
        Ok(())
    }
}

fn inbound(channel: &str, text: &str) -> InboundMessage {
    InboundMessage {
        channel: channel.to_owned(),
        user_id: "42".to_owned(),
        conversation_id: "88121".to_owned(),
        text: text.to_owned(),
        metadata: no_metadata(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deliver_routes_reply_through_the_channel() {
    let backend = ScriptBackend::new(vec![text_step("hello back")]);
    let harness = build_runtime(backend, RuntimeConfig::default(), true, None).await;

    let manager = SessionManager::new(Arc::clone(&harness.runtime));
    let channel = RecordingChannel::new("telegram", true);
    manager.register_channel(channel.clone() as _);

    let outcome = manager
        .deliver(inbound("telegram", "tell me something nice please"))
        .await
        .unwrap();

    match outcome {
        ProcessOutcome::Reply { text, .. } => assert_eq!(text, "hello back"),
        other => panic!("expected Reply, got {other:?}"),
    }

    assert_eq!(manager.live_sessions(), 1);
    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], ("88121".to_owned(), "hello back".to_owned()));

    // session_start was emitted for the first turn; the session id follows
    // the <channel>_<conversation>_<user> convention.
    let starts = harness.events.of_kind(EventKind::SessionStart);
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0]["session_id"], "telegram_88121_42");
}

#[tokio::test]
async fn rehydrated_session_carries_prior_history() {
    let backend = ScriptBackend::new(vec![
        text_step("your name is murmur"),
        text_step("as I said before"),
    ]);
    let harness = build_runtime(backend.clone(), RuntimeConfig::default(), true, None).await;

    // First manager handles the first exchange, then goes away.
    {
        let manager = SessionManager::new(Arc::clone(&harness.runtime));
        manager
            .deliver(inbound("telegram", "please tell me your name"))
            .await
            .unwrap();
        assert_eq!(manager.live_sessions(), 1);
    }

    // A fresh manager (same store) must rebuild the conversation before
    // processing the follow-up.
    let manager = SessionManager::new(Arc::clone(&harness.runtime));
    manager
        .deliver(inbound("telegram", "and what did you just say?"))
        .await
        .unwrap();

    let second_request = &backend.requests()[1];
    let texts: Vec<&str> = second_request
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert!(texts.iter().any(|t| t.contains("please tell me your name")));
    assert!(texts.iter().any(|t| t.contains("your name is murmur")));
}

#[tokio::test]
async fn filtered_ack_respects_channel_settings() {
    let backend = ScriptBackend::new(vec![]);
    let harness = build_runtime(backend, RuntimeConfig::default(), true, None).await;

    let manager = SessionManager::new(Arc::clone(&harness.runtime));
    let quiet = RecordingChannel::new("broadcast", false);
    manager.register_channel(quiet.clone() as _);

    let outcome = manager.deliver(inbound("broadcast", "ok")).await.unwrap();
    match outcome {
        ProcessOutcome::Filtered { ack } => assert!(ack.is_empty()),
        other => panic!("expected Filtered, got {other:?}"),
    }
    // Nothing went out on the wire.
    assert!(quiet.sent().is_empty());
}

#[tokio::test]
async fn cancel_interrupts_the_inflight_call() {
    let backend = ScriptBackend::slow(vec![text_step("too slow")], Duration::from_secs(30));
    let harness = build_runtime(backend, RuntimeConfig::default(), true, None).await;

    let manager = Arc::new(SessionManager::new(Arc::clone(&harness.runtime)));
    let channel = RecordingChannel::new("telegram", true);
    manager.register_channel(channel.clone() as _);

    let deliver_manager = Arc::clone(&manager);
    let work = tokio::spawn(async move {
        deliver_manager
            .deliver(inbound("telegram", "analyze the recent logs"))
            .await
    });

    // Let the actor reach the model call, then cancel.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.cancel("telegram_88121_42"));

    let result = work.await.unwrap();
    assert!(matches!(result, Err(AgentError::Cancelled)));

    // The user sees the single-line cancellation acknowledgment.
    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "Request cancelled.");
}

#[tokio::test]
async fn idle_sessions_are_swept_and_closed() {
    let backend = ScriptBackend::new(vec![text_step("done")]);
    let mut config = RuntimeConfig::default();
    config.session.idle_timeout_secs = 0;
    let harness = build_runtime(backend, config, true, None).await;

    let manager = SessionManager::new(Arc::clone(&harness.runtime));
    manager
        .deliver(inbound("telegram", "do the thing for me"))
        .await
        .unwrap();
    assert_eq!(manager.live_sessions(), 1);

    let closed = manager.sweep_idle().await;
    assert_eq!(closed, vec!["telegram_88121_42".to_owned()]);
    assert_eq!(manager.live_sessions(), 0);
    assert_eq!(harness.events.count(EventKind::SessionEnd), 1);

    assert!(!manager.cancel("telegram_88121_42"));
}

#[tokio::test]
async fn unknown_session_cannot_be_closed() {
    let backend = ScriptBackend::new(vec![]);
    let harness = build_runtime(backend, RuntimeConfig::default(), true, None).await;
    let manager = SessionManager::new(harness.runtime);
    assert!(!manager.close("ghost").await);
}
