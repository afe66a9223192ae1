//! Session actors and the session manager.
//!
//! Exactly one actor task exists per live session; every mutation of that
//! session's state happens inside it, serialized by its inbox. The manager
//! owns the actor handles, derives session ids for inbound messages,
//! rehydrates history from the store on first contact, routes outbound text
//! to registered channel adapters, and closes idle sessions.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_kernel::EventKind;
use murmur_provider::{Message, ToolCall, ToolResult};
use murmur_store::TurnRecord;

use crate::channel::{
    ChannelSettings, InboundMessage, OutboundChannel, SendOptions, derive_session_id,
};
use crate::error::{AgentError, ErrorClass, Result};
use crate::runtime::{AgentRuntime, ProcessOptions, ProcessOutcome, SessionState};

// ---------------------------------------------------------------------------
// Actor plumbing
// ---------------------------------------------------------------------------

enum Command {
    Process {
        text: String,
        options: ProcessOptions,
        allow_acks: bool,
        reply: oneshot::Sender<Result<ProcessOutcome>>,
    },
    Close,
}

/// Handle to one session's actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    tx: mpsc::Sender<Command>,
    /// The cancellation token of the in-flight operation, replaced at the
    /// start of each command.
    cancel_slot: Arc<StdMutex<CancellationToken>>,
    /// Unix timestamp of the last delivery, for the idle sweeper.
    last_activity: Arc<AtomicI64>,
}

impl SessionHandle {
    /// The session id this handle serves.
    pub fn id(&self) -> &str {
        &self.id
    }
}

fn spawn_actor(runtime: Arc<AgentRuntime>, mut state: SessionState) -> SessionHandle {
    let (tx, mut rx) = mpsc::channel::<Command>(16);
    let cancel_slot = Arc::new(StdMutex::new(CancellationToken::new()));
    let slot = Arc::clone(&cancel_slot);
    let id = state.id.clone();

    tokio::spawn(async move {
        debug!(session_id = %state.id, "session actor started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Process {
                    text,
                    options,
                    allow_acks,
                    reply,
                } => {
                    let token = CancellationToken::new();
                    {
                        let mut current = slot.lock().unwrap_or_else(|e| e.into_inner());
                        *current = token.clone();
                    }

                    let result = runtime
                        .process_message(&mut state, &text, &options, allow_acks, &token)
                        .await;
                    let _ = reply.send(result);
                }
                Command::Close => break,
            }
        }
        debug!(session_id = %state.id, "session actor stopped");
    });

    SessionHandle {
        id,
        tx,
        cancel_slot,
        last_activity: Arc::new(AtomicI64::new(Utc::now().timestamp())),
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct RegisteredChannel {
    settings: ChannelSettings,
    outbound: Arc<dyn OutboundChannel>,
}

/// Owns every live session actor and the channel registrations.
pub struct SessionManager {
    runtime: Arc<AgentRuntime>,
    sessions: DashMap<String, SessionHandle>,
    channels: DashMap<String, RegisteredChannel>,
}

impl SessionManager {
    /// Create a manager over a runtime.
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self {
            runtime,
            sessions: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Register a channel adapter's outbound half. Inbound delivery works
    /// without registration; outbound responses are then the caller's job.
    pub fn register_channel(&self, outbound: Arc<dyn OutboundChannel>) {
        let tag = outbound.channel_tag().to_owned();
        info!(channel = %tag, "channel registered");
        self.channels.insert(
            tag,
            RegisteredChannel {
                settings: outbound.settings(),
                outbound,
            },
        );
    }

    /// Deliver an inbound message: resolve (or create) the session actor,
    /// process, and push the response out through the channel adapter.
    pub async fn deliver(&self, message: InboundMessage) -> Result<ProcessOutcome> {
        let session_id =
            derive_session_id(&message.channel, &message.conversation_id, &message.user_id);
        let options = ProcessOptions::from_metadata(&message.metadata);
        let allow_acks = self
            .channels
            .get(&message.channel)
            .map(|c| c.settings.allow_acks)
            .unwrap_or(true);

        let handle = self
            .ensure_session(
                &session_id,
                &message.channel,
                &message.user_id,
                &message.conversation_id,
            )
            .await?;
        handle
            .last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(Command::Process {
                text: message.text.clone(),
                options,
                allow_acks,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AgentError::Internal("session actor is gone".into()))?;

        let result = reply_rx
            .await
            .map_err(|_| AgentError::Internal("session actor dropped the reply".into()))?;

        self.send_outbound(&message, &result).await;
        result
    }

    /// Cancel the session's in-flight operation (model call, tool, swarm).
    /// Returns `false` if the session is not live.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(handle) => {
                handle
                    .cancel_slot
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .cancel();
                info!(session_id, "session cancelled");
                true
            }
            None => false,
        }
    }

    /// Close a session: stop its actor and emit `session_end`.
    pub async fn close(&self, session_id: &str) -> bool {
        let Some((_, handle)) = self.sessions.remove(session_id) else {
            return false;
        };

        let _ = handle.tx.send(Command::Close).await;
        let payload = json!({"session_id": session_id});
        self.runtime.bus().emit(EventKind::SessionEnd, payload.clone());
        let hooks = self.runtime.hooks().clone();
        tokio::spawn(async move {
            let _ = hooks
                .dispatch(murmur_kernel::HookEvent::SessionEnd, payload)
                .await;
        });
        info!(session_id, "session closed");
        true
    }

    /// Close every session idle longer than the configured timeout.
    /// Returns the ids that were closed.
    pub async fn sweep_idle(&self) -> Vec<String> {
        let timeout = self.runtime.config().snapshot().session.idle_timeout_secs as i64;
        let now = Utc::now().timestamp();

        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now - entry.last_activity.load(Ordering::Relaxed) >= timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        for session_id in stale {
            if self.close(&session_id).await {
                closed.push(session_id);
            }
        }
        closed
    }

    /// Run [`SessionManager::sweep_idle`] forever on an interval.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let closed = manager.sweep_idle().await;
                if !closed.is_empty() {
                    debug!(count = closed.len(), "idle sessions swept");
                }
            }
        })
    }

    /// Number of live session actors.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Get the live actor for a session, spawning (and rehydrating) one if
    /// needed. Guarantees at most one actor per session: a racing spawn
    /// loses the map insert and its actor dies with its orphaned sender.
    async fn ensure_session(
        &self,
        session_id: &str,
        channel: &str,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<SessionHandle> {
        if let Some(handle) = self.sessions.get(session_id) {
            return Ok(handle.clone());
        }

        let store = self.runtime.store();
        store.upsert_session(session_id, channel, user_id).await?;
        let records = store.load_session(session_id).await?;
        let history = rehydrate(&records);
        if !history.is_empty() {
            debug!(session_id, turns = history.len(), "session rehydrated from store");
        }

        let plan_mode = self.runtime.config().snapshot().session.plan_mode;
        let state = SessionState::new(
            session_id,
            channel,
            user_id,
            conversation_id,
            plan_mode,
            history,
        );
        let handle = spawn_actor(Arc::clone(&self.runtime), state);

        match self.sessions.entry(session_id.to_owned()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Push the processing result out through the channel adapter, if one
    /// is registered. Send failures are logged, never fatal.
    async fn send_outbound(&self, message: &InboundMessage, result: &Result<ProcessOutcome>) {
        // Clone the adapter handle out so the registry shard is not held
        // across the send await.
        let Some(outbound) = self
            .channels
            .get(&message.channel)
            .map(|c| Arc::clone(&c.outbound))
        else {
            return;
        };

        let text = match result {
            Ok(ProcessOutcome::Reply { text, .. }) => Some(text.clone()),
            Ok(ProcessOutcome::Plan(plan)) => Some(plan.render()),
            Ok(ProcessOutcome::Filtered { ack }) if !ack.is_empty() => Some(ack.clone()),
            Ok(ProcessOutcome::Filtered { .. }) => None,
            Err(e) => Some(render_error(e)),
        };

        if let Some(text) = text {
            if let Err(send_err) = outbound
                .send(&message.conversation_id, &text, &SendOptions::default())
                .await
            {
                warn!(
                    channel = %message.channel,
                    error = %send_err,
                    "outbound send failed"
                );
            }
        }
    }
}

/// One-line user-visible rendering of a terminal error.
pub fn render_error(error: &AgentError) -> String {
    if error.class() == ErrorClass::Cancelled {
        return "Request cancelled.".to_owned();
    }
    let detail = error.to_string().replace('\n', " ");
    format!("Error [{}]: {detail}", error.kind())
}

/// Rebuild the in-memory message log from stored turn rows. Rows that fail
/// to parse degrade to plain text rather than poisoning the session.
fn rehydrate(records: &[TurnRecord]) -> Vec<Message> {
    let mut history = Vec::with_capacity(records.len());
    for record in records {
        let message = match record.role.as_str() {
            "user" => Message::user(&record.content),
            "system" => Message::system(&record.content),
            "assistant" => match &record.tool_calls_json {
                Some(raw) => match serde_json::from_str::<Vec<ToolCall>>(raw) {
                    Ok(calls) => Message::assistant_tool_calls(calls),
                    Err(e) => {
                        warn!(seq = record.seq, error = %e, "unparseable tool calls in stored turn");
                        Message::assistant(&record.content)
                    }
                },
                None => Message::assistant(&record.content),
            },
            "tool" => match &record.tool_result_json {
                Some(raw) => match serde_json::from_str::<ToolResult>(raw) {
                    Ok(result) => Message::tool_result(&result.tool_call_id, &result.content),
                    Err(e) => {
                        warn!(seq = record.seq, error = %e, "unparseable tool result in stored turn");
                        Message::tool_result("", &record.content)
                    }
                },
                None => Message::tool_result("", &record.content),
            },
            other => {
                warn!(seq = record.seq, role = other, "unknown stored role, treating as system note");
                Message::system(&record.content)
            }
        };
        history.push(message);
    }
    history
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
