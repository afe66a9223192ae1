//! Shared test harness: a scripted provider backend and a runtime builder
//! wired to an in-memory store.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use murmur_core::config::ConfigStore;
use murmur_core::identity::{Identity, IdentityStore};
use murmur_core::tools::ToolRegistry;
use murmur_core::{AgentRuntime, RuntimeConfig};
use murmur_kernel::{Event, EventBus, EventKind, HookRegistry};
use murmur_provider::backend::TokenSink;
use murmur_provider::router::{ProviderConfig, TierLimits};
use murmur_provider::types::{ChatRequest, Completion, CompletionContent, ToolCall, Usage};
use murmur_provider::{ChatBackend, ProviderRouter, Tier};
use murmur_store::{Database, TurnStore};

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// A backend that replays a scripted sequence of completions.
///
/// Compaction summary requests are answered out-of-band (recognized by
/// their prompt prefix) so scripts only describe the loop's own calls.
/// With `repeating`, the last step replays forever once the script is
/// exhausted.
pub struct ScriptBackend {
    steps: Mutex<VecDeque<CompletionContent>>,
    last: Mutex<Option<CompletionContent>>,
    repeat: bool,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptBackend {
    pub fn new(steps: Vec<CompletionContent>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            repeat: false,
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn repeating(step: CompletionContent) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::from([step])),
            last: Mutex::new(None),
            repeat: true,
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(steps: Vec<CompletionContent>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            repeat: false,
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request the loop sent (summary requests excluded).
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next(&self, request: &ChatRequest) -> Completion {
        // Compactor and noise-probe calls are serviced without consuming
        // the script.
        let last_user = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if last_user.starts_with("Summarize this conversation excerpt") {
            return completion_of(CompletionContent::Text(
                r#"{"summary": "Earlier work, condensed.", "facts": ["fact: kept"]}"#.into(),
            ));
        }

        self.requests.lock().unwrap().push(request.clone());

        let mut steps = self.steps.lock().unwrap();
        let content = match steps.pop_front() {
            Some(step) => step,
            None if self.repeat => self
                .last
                .lock()
                .unwrap()
                .clone()
                .expect("repeating script used before first step"),
            None => panic!("script backend ran out of steps"),
        };
        *self.last.lock().unwrap() = Some(content.clone());
        completion_of(content)
    }
}

fn completion_of(content: CompletionContent) -> Completion {
    Completion {
        content,
        usage: Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
        },
        provider: "mock".into(),
        model: "mock-model".into(),
    }
}

#[async_trait]
impl ChatBackend for ScriptBackend {
    fn id(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: &ChatRequest) -> murmur_provider::Result<Completion> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.next(request))
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        _on_token: TokenSink<'_>,
    ) -> murmur_provider::Result<Completion> {
        self.chat(request).await
    }
}

/// A tool-call completion step.
pub fn tool_call_step(id: &str, name: &str, arguments: Value) -> CompletionContent {
    CompletionContent::ToolCalls(vec![ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }])
}

/// A text completion step.
pub fn text_step(text: &str) -> CompletionContent {
    CompletionContent::Text(text.into())
}

// ---------------------------------------------------------------------------
// Runtime builder
// ---------------------------------------------------------------------------

pub struct Harness {
    pub runtime: Arc<AgentRuntime>,
    pub events: EventRecorder,
}

/// Build a runtime over an in-memory store and the given backend.
pub async fn build_runtime(
    backend: Arc<dyn ChatBackend>,
    config: RuntimeConfig,
    tool_capable: bool,
    tier_limits: Option<HashMap<Tier, TierLimits>>,
) -> Harness {
    let store = TurnStore::new(Database::open_in_memory().expect("in-memory db"));

    let provider_config = ProviderConfig {
        id: "mock".into(),
        default_model: "mock-model".into(),
        tier_models: HashMap::new(),
        configured: true,
        tool_capable,
        context_window: 128_000,
    };
    let router = match tier_limits {
        Some(limits) => ProviderRouter::with_tier_limits(vec![(provider_config, backend)], limits),
        None => ProviderRouter::new(vec![(provider_config, backend)]),
    };

    let bus = EventBus::new();
    let events = EventRecorder::attach(&bus);

    let runtime = Arc::new(AgentRuntime::new(
        ConfigStore::new(config),
        IdentityStore::new(Identity::minimal("Murmur")),
        bus,
        HookRegistry::new(),
        ToolRegistry::new(),
        router,
        store,
    ));

    Harness { runtime, events }
}

/// Like [`build_runtime`], with a swarm orchestrator attached over the
/// same provider chain.
pub async fn build_runtime_with_swarm(
    backend: Arc<dyn ChatBackend>,
    config: RuntimeConfig,
) -> Harness {
    let store = TurnStore::new(Database::open_in_memory().expect("in-memory db"));

    let provider_config = ProviderConfig {
        id: "mock".into(),
        default_model: "mock-model".into(),
        tier_models: HashMap::new(),
        configured: true,
        tool_capable: true,
        context_window: 128_000,
    };
    let router = ProviderRouter::new(vec![(provider_config, backend)]);

    let bus = EventBus::new();
    let events = EventRecorder::attach(&bus);

    let runtime = Arc::new(
        AgentRuntime::new(
            ConfigStore::new(config),
            IdentityStore::new(Identity::minimal("Murmur")),
            bus,
            HookRegistry::new(),
            ToolRegistry::new(),
            router.clone(),
            store,
        )
        .with_swarm(murmur_swarm::SwarmOrchestrator::new(router)),
    );

    Harness { runtime, events }
}

// ---------------------------------------------------------------------------
// Event recorder
// ---------------------------------------------------------------------------

/// Captures every bus event for assertions.
#[derive(Clone)]
pub struct EventRecorder {
    seen: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            EventKind::SessionStart,
            EventKind::SessionEnd,
            EventKind::ToolCall,
            EventKind::ToolError,
            EventKind::LlmResponse,
            EventKind::AgentResponse,
            EventKind::HookBlocked,
            EventKind::ContextPressure,
            EventKind::BudgetExceeded,
            EventKind::PlanProposed,
        ] {
            let seen_clone = Arc::clone(&seen);
            bus.subscribe(kind, move |event| {
                seen_clone.lock().unwrap().push(event.clone());
            });
        }
        Self { seen }
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<Value> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.payload.clone())
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.of_kind(kind).len()
    }
}

// ---------------------------------------------------------------------------
// Misc helpers
// ---------------------------------------------------------------------------

/// Default metadata for inbound messages.
pub fn no_metadata() -> Value {
    json!({})
}
