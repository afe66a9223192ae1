//! Channel adapter contract.
//!
//! Adapters (Telegram, Discord, HTTP, CLI, ...) live outside the core. They
//! deliver inbound messages through [`crate::session::SessionManager::deliver`]
//! and receive outbound text through the [`OutboundChannel`] callback they
//! register. Session id derivation happens here in the core — adapters never
//! construct session ids themselves.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// An inbound message as handed over by an adapter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Channel tag, e.g. `"telegram"`.
    pub channel: String,
    /// Originating user id, channel-scoped.
    pub user_id: String,
    /// Conversation id, channel-scoped (chat id, thread id, ...).
    pub conversation_id: String,
    /// The message text.
    pub text: String,
    /// Adapter-specific metadata (e.g. `{"skip_plan": true}`).
    pub metadata: Value,
}

/// Options for an outbound send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Suppress channel notifications where the adapter supports it.
    pub silent: bool,
    /// Message id to thread the reply under, where supported.
    pub reply_to: Option<String>,
}

/// Per-channel behavior knobs the core consults.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    /// Whether filtered messages get a canned acknowledgment. Broadcast-ish
    /// channels typically turn this off and filtered messages are dropped
    /// silently.
    pub allow_acks: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { allow_acks: true }
    }
}

/// The outbound half of a channel adapter.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// The channel tag this adapter serves.
    fn channel_tag(&self) -> &str;

    /// Behavior knobs for this channel.
    fn settings(&self) -> ChannelSettings {
        ChannelSettings::default()
    }

    /// Send text to a conversation on this channel.
    async fn send(&self, conversation_id: &str, text: &str, opts: &SendOptions) -> Result<()>;
}

/// Derive the canonical session id for an inbound message.
pub fn derive_session_id(channel: &str, conversation_id: &str, user_id: &str) -> String {
    format!("{channel}_{conversation_id}_{user_id}")
}
