//! The session loop.
//!
//! One [`process_message`](AgentRuntime::process_message) call drives a full
//! inbound message through the state machine: classify → noise gate →
//! `pre_llm` hooks → plan gate → the bounded ReAct loop (model call, hook-
//! gated tool dispatch, repeat) → outbound response. Every transition emits
//! an event on the bus. All session mutation happens through the owning
//! actor (`crate::session`), which is the only caller of this function for
//! a given session.

use std::time::Instant;

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_kernel::{EventBus, EventKind, HookDispatch, HookEvent, HookRegistry};
use murmur_provider::router::ChatOptions;
use murmur_provider::{
    CompletionContent, Message, ProviderRouter, Tier, ToolCall, ToolResult, Usage,
};
use murmur_store::{NewTurn, TurnStore};
use murmur_swarm::{Preset, SwarmOrchestrator};

use crate::compaction::{compact_messages, needs_compaction};
use crate::config::ConfigStore;
use crate::context::{Environment, build_context};
use crate::error::{AgentError, Result};
use crate::identity::IdentityStore;
use crate::noise::{NoiseFilter, WeightBand};
use crate::plan::{PLAN_INSTRUCTION, PlanProposal, parse_plan};
use crate::signal::{Confidence, Mode, Signal, classify, refine_with_llm};
use crate::tools::{ToolDispatcher, ToolRegistry};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Per-session user-tunable settings.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    /// Verbose responses (surfaced to hooks and prompts, not interpreted
    /// by the core).
    pub verbose: bool,
    /// Requested reasoning depth, forwarded to providers that support it.
    pub reasoning_depth: Option<String>,
}

/// All mutable state owned by one session.
///
/// Only the session's actor touches this; the invariant of exactly one
/// actor per live session makes every field single-writer.
#[derive(Debug)]
pub struct SessionState {
    /// Canonical session id (`<channel>_<conversation>_<user>`).
    pub id: String,
    /// Channel tag the session arrived on.
    pub channel: String,
    /// Originating user id.
    pub user_id: String,
    /// Conversation id on the channel.
    pub conversation_id: String,
    /// Whether plan mode gates build/execute tasks.
    pub plan_mode: bool,
    /// Per-session settings.
    pub settings: SessionSettings,
    /// Working conversation log (no system layer; that is assembled fresh
    /// per call).
    pub history: Vec<Message>,
    /// Signal of the latest inbound message.
    pub signal: Option<Signal>,
    /// Iterations used by the most recent ReAct loop.
    pub iterations: u32,
    /// Whether `session_start` has been emitted.
    started: bool,
    doom: DoomGuard,
}

impl SessionState {
    /// Create state for a fresh or rehydrated session.
    pub fn new(
        id: impl Into<String>,
        channel: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        plan_mode: bool,
        history: Vec<Message>,
    ) -> Self {
        let started = !history.is_empty();
        Self {
            id: id.into(),
            channel: channel.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            plan_mode,
            settings: SessionSettings::default(),
            history,
            signal: None,
            iterations: 0,
            started,
            doom: DoomGuard::default(),
        }
    }
}

/// Tracks consecutive identical failing tool calls.
///
/// Keyed on (tool name, canonical argument JSON). Any successful call, and
/// any call with a different key, resets the run.
#[derive(Debug, Default)]
struct DoomGuard {
    key: Option<(String, String)>,
    failures: u32,
}

impl DoomGuard {
    fn record_failure(&mut self, name: &str, args_key: &str) -> u32 {
        match &self.key {
            Some((n, a)) if n == name && a == args_key => {
                self.failures += 1;
            }
            _ => {
                self.key = Some((name.to_owned(), args_key.to_owned()));
                self.failures = 1;
            }
        }
        self.failures
    }

    fn record_success(&mut self) {
        self.key = None;
        self.failures = 0;
    }
}

// ---------------------------------------------------------------------------
// Options and outcomes
// ---------------------------------------------------------------------------

/// Caller-supplied options for one message.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Bypass the plan gate (set by the UI layer when re-invoking an
    /// approved plan).
    pub skip_plan: bool,
    /// Override the tier derived from signal weight.
    pub tier: Option<Tier>,
    /// Fan this message out to the named swarm preset instead of the
    /// single-agent loop.
    pub swarm_preset: Option<String>,
}

impl ProcessOptions {
    /// Extract options from adapter metadata.
    pub fn from_metadata(metadata: &Value) -> Self {
        Self {
            skip_plan: metadata["skip_plan"].as_bool().unwrap_or(false),
            tier: None,
            swarm_preset: metadata["swarm"].as_str().map(String::from),
        }
    }
}

/// What one processed message produced.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// A normal text response.
    Reply { text: String, usage: Usage },
    /// A plan proposal; the caller re-invokes with `skip_plan` to execute.
    Plan(PlanProposal),
    /// The message was filtered as noise; `ack` is empty when the channel
    /// disallows acknowledgments.
    Filtered { ack: String },
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Shared, read-mostly dependencies of every session loop.
pub struct AgentRuntime {
    config: ConfigStore,
    identity: IdentityStore,
    bus: EventBus,
    hooks: HookRegistry,
    tools: ToolRegistry,
    router: ProviderRouter,
    store: TurnStore,
    noise: NoiseFilter,
    swarm: Option<SwarmOrchestrator>,
    presets: DashMap<String, Preset>,
}

impl AgentRuntime {
    /// Assemble a runtime from its subsystems.
    pub fn new(
        config: ConfigStore,
        identity: IdentityStore,
        bus: EventBus,
        hooks: HookRegistry,
        tools: ToolRegistry,
        router: ProviderRouter,
        store: TurnStore,
    ) -> Self {
        Self {
            config,
            identity,
            bus,
            hooks,
            tools,
            router,
            store,
            noise: NoiseFilter::new(),
            swarm: None,
            presets: DashMap::new(),
        }
    }

    /// Attach a swarm orchestrator so decomposable tasks can fan out.
    pub fn with_swarm(mut self, orchestrator: SwarmOrchestrator) -> Self {
        self.swarm = Some(orchestrator);
        self
    }

    /// Register (or replace) a swarm preset by name.
    pub fn register_preset(&self, preset: Preset) {
        self.presets.insert(preset.name.clone(), preset);
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn store(&self) -> &TurnStore {
        &self.store
    }

    /// Drive one inbound message through the full state machine.
    ///
    /// `allow_acks` comes from the channel's settings; `cancel` covers the
    /// whole call including in-flight model and tool work.
    pub async fn process_message(
        &self,
        session: &mut SessionState,
        text: &str,
        options: &ProcessOptions,
        allow_acks: bool,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        if text.trim().is_empty() {
            return Err(AgentError::MalformedMessage {
                reason: "empty message".into(),
            });
        }

        let cfg = self.config.snapshot();

        // 1. Ensure the session row exists; the first turn announces the
        // session.
        self.store
            .upsert_session(&session.id, &session.channel, &session.user_id)
            .await?;
        if !session.started {
            let payload =
                json!({"session_id": session.id, "channel": session.channel, "user_id": session.user_id});
            self.bus.emit(EventKind::SessionStart, payload.clone());
            self.dispatch_post_hook(HookEvent::SessionStart, payload);
            session.started = true;
        }

        // 2. Append the user turn.
        session.history.push(Message::user(text));
        self.store
            .append(&session.id, NewTurn::user(text, &session.channel))
            .await?;

        // 3. Classify, then gate on noise.
        let mut signal = classify(text);
        if cfg.session.classifier_llm_assist && signal.confidence == Confidence::Low {
            signal = refine_with_llm(&self.router, text, signal).await;
        }
        session.signal = Some(signal.clone());

        if let Some(ack) = self.noise.tier1(text) {
            return self.finish_filtered(session, &signal, ack, allow_acks).await;
        }
        if signal.confidence == Confidence::High {
            match NoiseFilter::band(signal.weight, &cfg.noise) {
                WeightBand::Sub => {
                    let ack = self.noise.canned_ack();
                    return self.finish_filtered(session, &signal, ack, allow_acks).await;
                }
                WeightBand::Borderline if cfg.noise.llm_assist => {
                    if !self.noise.tier2_actionable(&self.router, text).await {
                        let ack = self.noise.canned_ack();
                        return self.finish_filtered(session, &signal, ack, allow_acks).await;
                    }
                }
                _ => {}
            }
        }

        // 4. pre_llm hooks gate the loop.
        let payload = json!({
            "session_id": session.id,
            "input": text,
            "signal": signal,
        });
        match self.hooks.dispatch(HookEvent::PreLlm, payload).await {
            HookDispatch::Allowed(_) => {}
            HookDispatch::Blocked { hook_name, reason } => {
                self.emit_hook_blocked("pre_llm", &hook_name, &reason);
                return Err(AgentError::HookBlocked { hook_name, reason });
            }
            HookDispatch::Failed { hook_name, reason } => {
                return Err(AgentError::HookFailed { hook_name, reason });
            }
        }

        // 5. Plan gate: build/execute tasks get a plan first.
        if session.plan_mode
            && matches!(signal.mode, Mode::Build | Mode::Execute)
            && !options.skip_plan
        {
            return self.propose_plan(session, &signal, cancel).await;
        }

        // 6. Decomposable tasks fan out to a swarm instead of the loop.
        if let Some(outcome) = self
            .maybe_swarm(session, text, &signal, options, cancel)
            .await?
        {
            return Ok(outcome);
        }

        // 7. The ReAct loop.
        self.react_loop(session, &signal, options, cancel).await
    }

    // -----------------------------------------------------------------------
    // Swarm path
    // -----------------------------------------------------------------------

    /// Decide whether this message goes to a swarm, and run it if so.
    ///
    /// The branch is taken when the caller named a preset, or when the
    /// config enables auto-swarming and the signal reads as a heavyweight
    /// build task. Cancellation of the session propagates into every
    /// worker through the child token.
    async fn maybe_swarm(
        &self,
        session: &mut SessionState,
        text: &str,
        signal: &Signal,
        options: &ProcessOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<ProcessOutcome>> {
        let Some(orchestrator) = &self.swarm else {
            return Ok(None);
        };

        let preset_name = match &options.swarm_preset {
            Some(name) => Some(name.clone()),
            None => {
                let cfg = self.config.snapshot();
                if signal.mode == Mode::Build && signal.weight >= 0.7 {
                    cfg.session.auto_swarm_preset.clone()
                } else {
                    None
                }
            }
        };
        let Some(name) = preset_name else {
            return Ok(None);
        };

        let preset = self
            .presets
            .get(&name)
            .map(|p| p.clone())
            .ok_or(AgentError::UnknownPreset { name })?;

        info!(session_id = %session.id, preset = %preset.name, "task fanned out to swarm");
        let outcome = orchestrator
            .run(&session.id, text, &preset, cancel.child_token())
            .await?;

        session.history.push(Message::assistant(&outcome.result));
        self.store
            .append(
                &session.id,
                NewTurn::assistant(&outcome.result, &session.channel),
            )
            .await?;

        self.dispatch_post_hook(
            HookEvent::PostResponse,
            json!({"session_id": session.id, "text": outcome.result}),
        );
        self.bus.emit(
            EventKind::AgentResponse,
            json!({
                "session_id": session.id,
                "text": outcome.result,
                "signal": signal,
                "usage": Usage::default(),
                "filtered": false,
                "swarm_id": outcome.swarm_id.to_string(),
                "failed_roles": outcome.failed_roles,
            }),
        );

        Ok(Some(ProcessOutcome::Reply {
            text: outcome.result,
            usage: Usage::default(),
        }))
    }

    // -----------------------------------------------------------------------
    // Filtered path
    // -----------------------------------------------------------------------

    async fn finish_filtered(
        &self,
        session: &mut SessionState,
        signal: &Signal,
        ack: String,
        allow_acks: bool,
    ) -> Result<ProcessOutcome> {
        let ack = if allow_acks { ack } else { String::new() };

        debug!(session_id = %session.id, weight = signal.weight, "message filtered as noise");

        if !ack.is_empty() {
            session.history.push(Message::assistant(&ack));
            self.store
                .append(&session.id, NewTurn::assistant(&ack, &session.channel))
                .await?;
        }

        self.bus.emit(
            EventKind::AgentResponse,
            json!({
                "session_id": session.id,
                "text": ack,
                "signal": signal,
                "usage": Usage::default(),
                "filtered": true,
            }),
        );

        Ok(ProcessOutcome::Filtered { ack })
    }

    // -----------------------------------------------------------------------
    // Plan path
    // -----------------------------------------------------------------------

    async fn propose_plan(
        &self,
        session: &mut SessionState,
        signal: &Signal,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let cfg = self.config.snapshot();
        let identity = self.identity.snapshot();
        let environment = self.environment(session);

        let mut assembly =
            build_context(&identity, signal, &environment, &session.history, &cfg.context);
        assembly.messages.push(Message::system(PLAN_INSTRUCTION));

        // Planning is orchestration work; route it at the elite tier.
        let opts = ChatOptions::for_tier(Tier::Elite);
        let completion = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = self.router.chat(&assembly.messages, &opts) => result?,
        };

        self.bus
            .emit(EventKind::LlmResponse, json!({"usage": completion.usage}));

        let reply = match completion.content {
            CompletionContent::Text(text) => text,
            CompletionContent::ToolCalls(_) => {
                return Err(AgentError::Internal(
                    "plan request returned tool calls instead of text".into(),
                ));
            }
        };

        session.history.push(Message::assistant(&reply));
        self.store
            .append(&session.id, NewTurn::assistant(&reply, &session.channel))
            .await?;

        let plan = parse_plan(&reply);
        self.bus.emit(
            EventKind::PlanProposed,
            json!({
                "session_id": session.id,
                "goal": plan.goal,
                "steps": plan.steps.len(),
            }),
        );

        info!(session_id = %session.id, steps = plan.steps.len(), "plan proposed");
        Ok(ProcessOutcome::Plan(plan))
    }

    // -----------------------------------------------------------------------
    // ReAct loop
    // -----------------------------------------------------------------------

    async fn react_loop(
        &self,
        session: &mut SessionState,
        signal: &Signal,
        options: &ProcessOptions,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let cfg = self.config.snapshot();
        let tier = options.tier.unwrap_or_else(|| signal.tier());
        let max_iterations = self.router.tier_limits(tier).max_iterations;

        let identity = self.identity.snapshot();
        let environment = self.environment(session);
        let dispatcher = self.tools.dispatcher(&cfg.tools);

        // Gate tool schemas on the active provider's declared capability:
        // a model that cannot do tool calling must never see schemas, or it
        // will hallucinate invocations.
        let provider = self.router.active_provider_info()?;
        let tool_schemas = if provider.tool_capable {
            dispatcher.schemas()
        } else {
            debug!(provider = %provider.id, "provider not tool-capable, stripping tool schemas");
            Vec::new()
        };

        session.iterations = 0;

        info!(
            session_id = %session.id,
            tier = %tier,
            max_iterations,
            tools = tool_schemas.len(),
            "entering loop"
        );

        loop {
            // The cap is checked before the next model call, so a loop that
            // hits it on a tool-call turn halts without another request.
            if session.iterations >= max_iterations {
                return Err(AgentError::MaxIterationsReached {
                    session_id: session.id.clone(),
                    max_iterations,
                });
            }

            // Compact under context pressure before building the prompt.
            if needs_compaction(&session.history, &cfg.context) {
                let outcome =
                    compact_messages(&session.history, &self.router, &cfg.context).await?;
                if outcome.saved() > 0 {
                    let payload = json!({
                        "before_tokens": outcome.before_tokens,
                        "after_tokens": outcome.after_tokens,
                        "saved": outcome.saved(),
                    });
                    self.bus.emit(EventKind::ContextPressure, payload.clone());
                    self.dispatch_post_hook(HookEvent::ContextPressure, payload);
                    session.history = outcome.messages;
                }
            }

            let assembly =
                build_context(&identity, signal, &environment, &session.history, &cfg.context);

            // Even after compaction the builder may have had to drop turns
            // to stay inside the window; that is a budget breach worth
            // surfacing.
            if assembly.messages.len() < session.history.len() + 1 {
                let payload = json!({
                    "session_id": session.id,
                    "projected_tokens": assembly.projected_tokens,
                    "dropped_turns": session.history.len() + 1 - assembly.messages.len(),
                });
                self.bus.emit(EventKind::BudgetExceeded, payload.clone());
                self.dispatch_post_hook(HookEvent::BudgetExceeded, payload);
            }

            let opts = ChatOptions {
                tier,
                tools: tool_schemas.clone(),
                temperature: None,
                max_tokens: None,
            };
            let completion = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                result = self.router.chat(&assembly.messages, &opts) => result?,
            };

            session.iterations += 1;
            self.bus
                .emit(EventKind::LlmResponse, json!({"usage": completion.usage}));
            self.dispatch_post_hook(
                HookEvent::PostLlm,
                json!({"session_id": session.id, "usage": completion.usage}),
            );

            match completion.content {
                CompletionContent::Text(text) => {
                    // pre_response is the last synchronous gate; it may
                    // rewrite the outgoing text.
                    let payload = json!({"session_id": session.id, "text": text});
                    let text = match self.hooks.dispatch(HookEvent::PreResponse, payload).await {
                        HookDispatch::Allowed(rewritten) => rewritten["text"]
                            .as_str()
                            .map(String::from)
                            .unwrap_or(text),
                        HookDispatch::Blocked { hook_name, reason } => {
                            self.emit_hook_blocked("pre_response", &hook_name, &reason);
                            return Err(AgentError::HookBlocked { hook_name, reason });
                        }
                        HookDispatch::Failed { hook_name, reason } => {
                            return Err(AgentError::HookFailed { hook_name, reason });
                        }
                    };

                    session.history.push(Message::assistant(&text));
                    self.store
                        .append(&session.id, NewTurn::assistant(&text, &session.channel))
                        .await?;

                    self.dispatch_post_hook(
                        HookEvent::PostResponse,
                        json!({"session_id": session.id, "text": text}),
                    );

                    self.bus.emit(
                        EventKind::AgentResponse,
                        json!({
                            "session_id": session.id,
                            "text": text,
                            "signal": signal,
                            "usage": completion.usage,
                            "filtered": false,
                        }),
                    );

                    info!(
                        session_id = %session.id,
                        iterations = session.iterations,
                        "loop complete"
                    );
                    return Ok(ProcessOutcome::Reply {
                        text,
                        usage: completion.usage,
                    });
                }

                CompletionContent::ToolCalls(calls) => {
                    debug!(
                        session_id = %session.id,
                        count = calls.len(),
                        tools = ?calls.iter().map(|c| &c.name).collect::<Vec<_>>(),
                        "model requested tool calls"
                    );

                    session
                        .history
                        .push(Message::assistant_tool_calls(calls.clone()));
                    self.store
                        .append(
                            &session.id,
                            NewTurn::assistant_tool_calls(
                                serde_json::to_string(&calls)?,
                                &session.channel,
                            ),
                        )
                        .await?;

                    for call in &calls {
                        let (result, cancelled) =
                            self.run_tool_call(session, call, &dispatcher, cancel).await?;

                        session.history.push(Message::tool_result(
                            &result.tool_call_id,
                            &result.content,
                        ));
                        self.store
                            .append(
                                &session.id,
                                NewTurn::tool_result(
                                    serde_json::to_string(&result)?,
                                    &session.channel,
                                ),
                            )
                            .await?;

                        self.dispatch_post_hook(
                            HookEvent::PostToolUse,
                            json!({
                                "session_id": session.id,
                                "name": call.name,
                                "result": result.content,
                                "ok": !result.is_error,
                            }),
                        );

                        // The cancelled result is appended first so the log
                        // stays consistent, then the loop exits.
                        if cancelled {
                            return Err(AgentError::Cancelled);
                        }

                        if result.is_error {
                            let args_key = call.arguments.to_string();
                            let run = session.doom.record_failure(&call.name, &args_key);
                            if run >= cfg.session.doom_loop_threshold {
                                warn!(
                                    session_id = %session.id,
                                    tool = %call.name,
                                    failures = run,
                                    "doom loop detected"
                                );
                                return Err(AgentError::DoomLoop {
                                    tool_name: call.name.clone(),
                                });
                            }
                        } else {
                            session.doom.record_success();
                        }
                    }
                }
            }
        }
    }

    /// Run one tool call through `pre_tool_use` hooks and the dispatcher.
    ///
    /// Policy blocks and tool failures come back as error tool results (the
    /// model may recover); hook infrastructure failures and cancellation
    /// propagate as errors. The bool marks a cancelled execution whose
    /// result must still be appended before the loop exits.
    async fn run_tool_call(
        &self,
        session: &SessionState,
        call: &ToolCall,
        dispatcher: &ToolDispatcher,
        cancel: &CancellationToken,
    ) -> Result<(ToolResult, bool)> {
        let payload = json!({
            "session_id": session.id,
            "name": call.name,
            "arguments": call.arguments,
        });

        let allowed = match self.hooks.dispatch(HookEvent::PreToolUse, payload).await {
            HookDispatch::Allowed(payload) => payload,
            HookDispatch::Blocked { hook_name, reason } => {
                self.emit_hook_blocked("pre_tool_use", &hook_name, &reason);
                return Ok((
                    ToolResult {
                        tool_call_id: call.id.clone(),
                        content: format!("Error: blocked by hook `{hook_name}`: {reason}"),
                        is_error: true,
                    },
                    false,
                ));
            }
            HookDispatch::Failed { hook_name, reason } => {
                return Err(AgentError::HookFailed { hook_name, reason });
            }
        };

        // Hooks may rewrite the call (e.g. redact an argument).
        let name = allowed["name"].as_str().unwrap_or(&call.name).to_owned();
        let arguments = if allowed["arguments"].is_null() {
            call.arguments.clone()
        } else {
            allowed["arguments"].clone()
        };

        self.bus.emit(
            EventKind::ToolCall,
            json!({"name": name, "phase": "start", "args": arguments}),
        );

        let start = Instant::now();
        let executed = dispatcher.execute(&name, &arguments, cancel).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match executed {
            Ok(content) => {
                self.bus.emit(
                    EventKind::ToolCall,
                    json!({"name": name, "phase": "end", "duration_ms": duration_ms, "ok": true}),
                );
                Ok((
                    ToolResult {
                        tool_call_id: call.id.clone(),
                        content,
                        is_error: false,
                    },
                    false,
                ))
            }
            Err(AgentError::Cancelled) => Ok((
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: "Error: cancelled".into(),
                    is_error: true,
                },
                true,
            )),
            Err(e) => {
                self.bus.emit(
                    EventKind::ToolCall,
                    json!({"name": name, "phase": "end", "duration_ms": duration_ms, "ok": false}),
                );
                let error_payload = json!({"name": name, "reason": e.to_string()});
                self.bus.emit(EventKind::ToolError, error_payload.clone());
                self.dispatch_post_hook(HookEvent::ToolError, error_payload);
                warn!(tool = %name, error = %e, "tool execution failed");
                Ok((
                    ToolResult {
                        tool_call_id: call.id.clone(),
                        content: format!("Error: {e}"),
                        is_error: true,
                    },
                    false,
                ))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn environment(&self, session: &SessionState) -> Environment {
        Environment {
            channel: session.channel.clone(),
            cwd: std::env::current_dir()
                .ok()
                .map(|p| p.display().to_string()),
            facets: Vec::new(),
        }
    }

    fn emit_hook_blocked(&self, event: &str, hook_name: &str, reason: &str) {
        self.bus.emit(
            EventKind::HookBlocked,
            json!({"event": event, "hook_name": hook_name, "reason": reason}),
        );
    }

    /// `post_*` hooks must not block the loop's next step; run them
    /// fire-and-forget.
    fn dispatch_post_hook(&self, event: HookEvent, payload: Value) {
        let hooks = self.hooks.clone();
        tokio::spawn(async move {
            let _ = hooks.dispatch(event, payload).await;
        });
    }
}
