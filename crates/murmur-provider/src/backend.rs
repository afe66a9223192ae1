//! The backend trait every provider implementation satisfies.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, Completion};

/// Callback invoked for each streamed text token.
pub type TokenSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// A concrete LLM provider the router can dispatch to.
///
/// Backends own their wire format and HTTP plumbing; tier → model mapping
/// and fallback live above them in the router.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// The provider id this backend serves (e.g. `"anthropic"`).
    fn id(&self) -> &str;

    /// Send a chat request and return the full completion.
    async fn chat(&self, request: &ChatRequest) -> Result<Completion>;

    /// Send a chat request in streaming mode, yielding text tokens through
    /// `on_token`. The returned [`Completion`] carries the final usage
    /// record aggregated from the stream.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        on_token: TokenSink<'_>,
    ) -> Result<Completion>;
}
