//! Tiered provider router with fallback.
//!
//! The router owns an ordered chain of providers. Callers ask for a
//! [`Tier`] rather than a model; the router resolves tier → model for
//! whichever provider ends up serving the call. On a transient failure
//! (timeout, 429, 5xx, connection reset) it retries once on the same
//! provider, then advances down the chain, re-resolving the tier for the
//! new provider. Hard failures (auth, invalid request) surface immediately.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{ChatBackend, TokenSink};
use crate::error::{ProviderError, Result};
use crate::types::{ChatRequest, Completion, Message, Tier, ToolSchema};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Declarative description of a provider in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider id; must match the backend's [`ChatBackend::id`].
    pub id: String,

    /// Model used when a tier has no explicit mapping.
    pub default_model: String,

    /// Tier → model mapping for this provider.
    #[serde(default)]
    pub tier_models: HashMap<Tier, String>,

    /// Whether credentials/endpoint are present. Unconfigured providers are
    /// skipped by the chain.
    #[serde(default = "default_true")]
    pub configured: bool,

    /// Whether the provider's models can be trusted with tool schemas.
    /// Small local models are declared `false` so the context builder
    /// strips tools entirely.
    #[serde(default = "default_true")]
    pub tool_capable: bool,

    /// Context window in tokens.
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

fn default_true() -> bool {
    true
}

fn default_context_window() -> u32 {
    128_000
}

impl ProviderConfig {
    /// Resolve the model for a tier, falling back to the default model.
    pub fn model_for(&self, tier: Tier) -> String {
        self.tier_models
            .get(&tier)
            .cloned()
            .unwrap_or_else(|| self.default_model.clone())
    }
}

/// Per-tier budget applied when the caller does not override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierLimits {
    /// Maximum tokens the model may generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// ReAct iteration ceiling for loops driven at this tier.
    pub max_iterations: u32,
}

impl TierLimits {
    /// The default per-tier budget table.
    pub fn defaults() -> HashMap<Tier, TierLimits> {
        HashMap::from([
            (
                Tier::Elite,
                TierLimits {
                    max_tokens: 8192,
                    temperature: 0.7,
                    max_iterations: 30,
                },
            ),
            (
                Tier::Specialist,
                TierLimits {
                    max_tokens: 8192,
                    temperature: 0.2,
                    max_iterations: 30,
                },
            ),
            (
                Tier::Utility,
                TierLimits {
                    max_tokens: 1024,
                    temperature: 0.0,
                    max_iterations: 10,
                },
            ),
        ])
    }
}

/// Capability report for a provider, used by the loop to decide whether to
/// attach tool schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub default_model: String,
    pub tier_models: HashMap<Tier, String>,
    pub configured: bool,
    pub tool_capable: bool,
    pub context_window: u32,
}

/// Options for a routed chat call.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// The tier to resolve against the serving provider.
    pub tier: Tier,
    /// Tool schemas to advertise (already gated by the caller).
    pub tools: Vec<ToolSchema>,
    /// Override the tier's default temperature.
    pub temperature: Option<f32>,
    /// Override the tier's default max tokens.
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    /// Options for a tier with no tools and tier-default sampling.
    pub fn for_tier(tier: Tier) -> Self {
        Self {
            tier,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

struct ProviderEntry {
    config: ProviderConfig,
    backend: Arc<dyn ChatBackend>,
}

/// Ordered provider chain with tier resolution and fallback.
///
/// The first registered provider is the default; the rest form the fallback
/// chain in registration order. Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct ProviderRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    chain: Vec<ProviderEntry>,
    tier_limits: HashMap<Tier, TierLimits>,
}

impl ProviderRouter {
    /// Build a router from an ordered provider chain.
    pub fn new(providers: Vec<(ProviderConfig, Arc<dyn ChatBackend>)>) -> Self {
        let chain = providers
            .into_iter()
            .map(|(config, backend)| ProviderEntry { config, backend })
            .collect();

        Self {
            inner: Arc::new(RouterInner {
                chain,
                tier_limits: TierLimits::defaults(),
            }),
        }
    }

    /// Build a router with an explicit tier budget table.
    pub fn with_tier_limits(
        providers: Vec<(ProviderConfig, Arc<dyn ChatBackend>)>,
        tier_limits: HashMap<Tier, TierLimits>,
    ) -> Self {
        let chain = providers
            .into_iter()
            .map(|(config, backend)| ProviderEntry { config, backend })
            .collect();

        Self {
            inner: Arc::new(RouterInner { chain, tier_limits }),
        }
    }

    /// The budget for a tier.
    pub fn tier_limits(&self, tier: Tier) -> TierLimits {
        self.inner
            .tier_limits
            .get(&tier)
            .copied()
            .unwrap_or(TierLimits {
                max_tokens: 4096,
                temperature: 0.0,
                max_iterations: 30,
            })
    }

    /// Capability report for a provider id.
    pub fn provider_info(&self, id: &str) -> Result<ProviderInfo> {
        self.inner
            .chain
            .iter()
            .find(|e| e.config.id == id)
            .map(|e| ProviderInfo {
                id: e.config.id.clone(),
                default_model: e.config.default_model.clone(),
                tier_models: e.config.tier_models.clone(),
                configured: e.config.configured,
                tool_capable: e.config.tool_capable,
                context_window: e.config.context_window,
            })
            .ok_or_else(|| ProviderError::UnknownProvider {
                provider: id.to_owned(),
            })
    }

    /// Capability report for the chain head (the default provider).
    pub fn active_provider_info(&self) -> Result<ProviderInfo> {
        let entry = self
            .inner
            .chain
            .iter()
            .find(|e| e.config.configured)
            .ok_or(ProviderError::Exhausted { attempted: 0 })?;
        self.provider_info(&entry.config.id)
    }

    /// List every registered provider's capability report.
    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.inner
            .chain
            .iter()
            .map(|e| ProviderInfo {
                id: e.config.id.clone(),
                default_model: e.config.default_model.clone(),
                tier_models: e.config.tier_models.clone(),
                configured: e.config.configured,
                tool_capable: e.config.tool_capable,
                context_window: e.config.context_window,
            })
            .collect()
    }

    /// Send a chat request through the chain, returning the completion from
    /// whichever provider served it.
    pub async fn chat(&self, messages: &[Message], opts: &ChatOptions) -> Result<Completion> {
        self.dispatch(messages, opts, None).await
    }

    /// Streaming variant of [`ProviderRouter::chat`]. Tokens are yielded
    /// through `on_token`; the returned completion carries the final usage
    /// record.
    ///
    /// If a provider fails mid-stream and the chain advances, tokens already
    /// emitted for the failed attempt are not retracted — render layers
    /// should reset on retry notification if exact output matters.
    pub async fn chat_stream(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
        on_token: TokenSink<'_>,
    ) -> Result<Completion> {
        self.dispatch(messages, opts, Some(on_token)).await
    }

    /// Walk the chain: one retry per provider on transient errors, then
    /// advance; hard errors surface immediately.
    async fn dispatch(
        &self,
        messages: &[Message],
        opts: &ChatOptions,
        mut sink: Option<TokenSink<'_>>,
    ) -> Result<Completion> {
        let limits = self.tier_limits(opts.tier);
        let mut attempted = 0usize;
        let mut fell_back = false;

        for entry in &self.inner.chain {
            if !entry.config.configured {
                continue;
            }

            let request = ChatRequest {
                model: entry.config.model_for(opts.tier),
                messages: messages.to_vec(),
                tools: opts.tools.clone(),
                temperature: Some(opts.temperature.unwrap_or(limits.temperature)),
                max_tokens: Some(opts.max_tokens.unwrap_or(limits.max_tokens)),
            };

            // One retry on the same provider before advancing.
            for attempt in 0..2u32 {
                attempted += 1;

                let result = match sink.as_mut() {
                    Some(on_token) => entry.backend.chat_stream(&request, &mut **on_token).await,
                    None => entry.backend.chat(&request).await,
                };

                match result {
                    Ok(completion) => {
                        if fell_back {
                            info!(
                                provider = %entry.config.id,
                                model = %request.model,
                                "request served after provider fallback"
                            );
                        }
                        return Ok(completion);
                    }
                    Err(e) if e.is_transient() => {
                        warn!(
                            provider = %entry.config.id,
                            attempt,
                            error = %e,
                            "transient provider error"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            fell_back = true;
            warn!(provider = %entry.config.id, "provider exhausted retries, advancing chain");
        }

        Err(ProviderError::Exhausted { attempted })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompletionContent, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// A scripted backend: pops one result per call.
    struct MockBackend {
        id: String,
        script: Mutex<Vec<Result<String>>>,
        calls: Mutex<Vec<ChatRequest>>,
    }

    impl MockBackend {
        fn new(id: &str, script: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_owned(),
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn next(&self, request: &ChatRequest) -> Result<Completion> {
            self.calls.lock().unwrap().push(request.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                panic!("mock backend `{}` ran out of scripted results", self.id);
            }
            script.remove(0).map(|text| Completion {
                content: CompletionContent::Text(text),
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                },
                provider: self.id.clone(),
                model: request.model.clone(),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for MockBackend {
        fn id(&self) -> &str {
            &self.id
        }

        async fn chat(&self, request: &ChatRequest) -> Result<Completion> {
            self.next(request)
        }

        async fn chat_stream(
            &self,
            request: &ChatRequest,
            on_token: TokenSink<'_>,
        ) -> Result<Completion> {
            let completion = self.next(request)?;
            if let CompletionContent::Text(text) = &completion.content {
                on_token(text);
            }
            Ok(completion)
        }
    }

    fn config(id: &str, default_model: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.to_owned(),
            default_model: default_model.to_owned(),
            tier_models: HashMap::new(),
            configured: true,
            tool_capable: true,
            context_window: 128_000,
        }
    }

    fn rate_limited(provider: &str) -> ProviderError {
        ProviderError::Http {
            provider: provider.to_owned(),
            status: 429,
            reason: "rate limited".into(),
        }
    }

    #[tokio::test]
    async fn happy_path_uses_default_provider() {
        let backend = MockBackend::new("a", vec![Ok("hello".into())]);
        let router = ProviderRouter::new(vec![(config("a", "model-a"), backend.clone() as _)]);

        let completion = router
            .chat(
                &[Message::user("hi")],
                &ChatOptions::for_tier(Tier::Specialist),
            )
            .await
            .unwrap();

        assert_eq!(completion.provider, "a");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn retries_once_then_advances_chain() {
        // Provider A 429s twice in a row; the router must retry once on A,
        // then advance to B and succeed there.
        let a = MockBackend::new("a", vec![Err(rate_limited("a")), Err(rate_limited("a"))]);
        let b = MockBackend::new("b", vec![Ok("served by b".into())]);

        let mut cfg_b = config("b", "model-b");
        cfg_b
            .tier_models
            .insert(Tier::Specialist, "model-b-specialist".into());

        let router = ProviderRouter::new(vec![
            (config("a", "model-a"), a.clone() as _),
            (cfg_b, b.clone() as _),
        ]);

        let completion = router
            .chat(
                &[Message::user("hi")],
                &ChatOptions::for_tier(Tier::Specialist),
            )
            .await
            .unwrap();

        assert_eq!(a.call_count(), 2);
        assert_eq!(b.call_count(), 1);
        assert_eq!(completion.provider, "b");
        // Tier→model was re-resolved for the new provider.
        assert_eq!(completion.model, "model-b-specialist");
    }

    #[tokio::test]
    async fn hard_error_does_not_fall_back() {
        let a = MockBackend::new(
            "a",
            vec![Err(ProviderError::Auth {
                provider: "a".into(),
            })],
        );
        let b = MockBackend::new("b", vec![Ok("should never serve".into())]);

        let router = ProviderRouter::new(vec![
            (config("a", "model-a"), a.clone() as _),
            (config("b", "model-b"), b.clone() as _),
        ]);

        let result = router
            .chat(&[Message::user("hi")], &ChatOptions::for_tier(Tier::Elite))
            .await;

        assert!(matches!(result, Err(ProviderError::Auth { .. })));
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_attempts() {
        let a = MockBackend::new("a", vec![Err(rate_limited("a")), Err(rate_limited("a"))]);
        let router = ProviderRouter::new(vec![(config("a", "model-a"), a as _)]);

        let result = router
            .chat(&[Message::user("hi")], &ChatOptions::for_tier(Tier::Utility))
            .await;

        match result {
            Err(ProviderError::Exhausted { attempted }) => assert_eq!(attempted, 2),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_providers_are_skipped() {
        let mut cfg_a = config("a", "model-a");
        cfg_a.configured = false;
        let a = MockBackend::new("a", vec![]);
        let b = MockBackend::new("b", vec![Ok("b".into())]);

        let router = ProviderRouter::new(vec![
            (cfg_a, a.clone() as _),
            (config("b", "model-b"), b.clone() as _),
        ]);

        let completion = router
            .chat(&[Message::user("hi")], &ChatOptions::for_tier(Tier::Utility))
            .await
            .unwrap();

        assert_eq!(completion.provider, "b");
        assert_eq!(a.call_count(), 0);
    }

    #[tokio::test]
    async fn chat_stream_yields_tokens_and_usage() {
        let backend = MockBackend::new("a", vec![Ok("streamed text".into())]);
        let router = ProviderRouter::new(vec![(config("a", "model-a"), backend as _)]);

        let mut collected = String::new();
        let completion = router
            .chat_stream(
                &[Message::user("hi")],
                &ChatOptions::for_tier(Tier::Specialist),
                &mut |token| collected.push_str(token),
            )
            .await
            .unwrap();

        assert_eq!(collected, "streamed text");
        assert_eq!(completion.usage.prompt_tokens, 10);
        assert_eq!(completion.usage.completion_tokens, 5);
    }

    #[test]
    fn tier_defaults_cap_utility_lower() {
        let router = ProviderRouter::new(vec![]);
        let elite = router.tier_limits(Tier::Elite);
        let utility = router.tier_limits(Tier::Utility);
        assert_eq!(elite.max_iterations, 30);
        assert!(utility.max_iterations < elite.max_iterations);
        assert!(utility.max_tokens < elite.max_tokens);
    }

    #[test]
    fn provider_info_reports_capabilities() {
        let backend = MockBackend::new("local", vec![]);
        let mut cfg = config("local", "tiny-7b");
        cfg.tool_capable = false;
        cfg.context_window = 8192;

        let router = ProviderRouter::new(vec![(cfg, backend as _)]);
        let info = router.provider_info("local").unwrap();
        assert!(!info.tool_capable);
        assert_eq!(info.context_window, 8192);

        assert!(matches!(
            router.provider_info("missing"),
            Err(ProviderError::UnknownProvider { .. })
        ));
    }
}
