//! Wave-based swarm execution.
//!
//! The orchestrator runs a preset against a task: one transient worker per
//! role, concurrency within a wave, a barrier between waves, and a final
//! synthesis step (run by the lead role when the preset has one).

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_provider::router::ChatOptions;
use murmur_provider::{Completion, CompletionContent, Message, ProviderRouter};

use crate::error::{Result, SwarmError};
use crate::mailbox::{Mailbox, MailboxEntry};
use crate::preset::{LEAD_ROLE, Preset, RoleSpec};

/// Default per-worker wall-clock budget.
const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The merged result of a completed swarm.
#[derive(Debug, Clone)]
pub struct SwarmOutcome {
    /// Unique id for this swarm run.
    pub swarm_id: Uuid,
    /// The session that spawned the swarm.
    pub parent_session: String,
    /// The task the swarm worked on.
    pub task: String,
    /// The synthesized final result.
    pub result: String,
    /// Roles that failed (crashed, timed out or errored). Never contains
    /// the lead: a lead failure fails the whole swarm instead.
    pub failed_roles: Vec<String>,
    /// The full mailbox log, for audit.
    pub mailbox: Vec<MailboxEntry>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs swarms against a provider router.
#[derive(Clone)]
pub struct SwarmOrchestrator {
    router: ProviderRouter,
    worker_timeout: Duration,
}

impl SwarmOrchestrator {
    /// Create an orchestrator with the default worker timeout.
    pub fn new(router: ProviderRouter) -> Self {
        Self {
            router,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }

    /// Override the per-worker timeout.
    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Execute `preset` against `task` and synthesize the merged result.
    ///
    /// Waves run in dependency order; roles within a wave run concurrently.
    /// A failed non-lead role is recorded and execution continues. A failed
    /// lead fails the swarm.
    pub async fn run(
        &self,
        parent_session: &str,
        task: &str,
        preset: &Preset,
        cancel: CancellationToken,
    ) -> Result<SwarmOutcome> {
        let waves = preset.waves()?;
        let swarm_id = Uuid::now_v7();
        let mailbox = Mailbox::new(swarm_id.to_string());
        let mut failed_roles: Vec<String> = Vec::new();

        info!(
            swarm_id = %swarm_id,
            parent_session,
            preset = %preset.name,
            waves = waves.len(),
            "swarm starting"
        );

        for (wave_index, wave) in waves.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(SwarmError::Cancelled);
            }

            let mut handles: Vec<(String, JoinHandle<std::result::Result<String, String>>)> =
                Vec::with_capacity(wave.len());

            for role in wave {
                let role = (*role).clone();
                let role_name = role.role.clone();
                let router = self.router.clone();
                let mailbox = mailbox.clone();
                let cancel = cancel.clone();
                let task = task.to_owned();
                let timeout = self.worker_timeout;

                handles.push((
                    role_name,
                    tokio::spawn(async move {
                        run_worker(&router, &role, &task, &mailbox, timeout, &cancel).await
                    }),
                ));
            }

            // Wave barrier: collect every worker before the next wave starts.
            for (role_name, handle) in handles {
                match handle.await {
                    Ok(Ok(output)) => {
                        // One mailbox entry per worker: its final result.
                        mailbox.post(&role_name, output);
                    }
                    Ok(Err(reason)) => {
                        if role_name == LEAD_ROLE {
                            return Err(SwarmError::LeadFailed { reason });
                        }
                        warn!(swarm_id = %swarm_id, role = %role_name, reason = %reason, "worker failed");
                        failed_roles.push(role_name);
                    }
                    Err(join_err) => {
                        let reason = format!("worker panicked: {join_err}");
                        if role_name == LEAD_ROLE {
                            return Err(SwarmError::LeadFailed { reason });
                        }
                        warn!(swarm_id = %swarm_id, role = %role_name, reason = %reason, "worker crashed");
                        failed_roles.push(role_name);
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(SwarmError::Cancelled);
            }

            tracing::debug!(swarm_id = %swarm_id, wave = wave_index, "wave complete");
        }

        let result = self
            .synthesize(task, preset, &mailbox, &failed_roles, &cancel)
            .await?;

        info!(
            swarm_id = %swarm_id,
            failed = failed_roles.len(),
            "swarm complete"
        );

        Ok(SwarmOutcome {
            swarm_id,
            parent_session: parent_session.to_owned(),
            task: task.to_owned(),
            result,
            failed_roles,
            mailbox: mailbox.entries(),
        })
    }

    /// Produce the merged result: a final lead call when the preset has a
    /// lead, otherwise a mechanical merge of the mailbox.
    async fn synthesize(
        &self,
        task: &str,
        preset: &Preset,
        mailbox: &Mailbox,
        failed_roles: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let failed_note = if failed_roles.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nThe following roles failed and produced no output: {}. \
                 Note this in the result.",
                failed_roles.join(", ")
            )
        };

        let Some(lead) = preset.role(LEAD_ROLE) else {
            // No lead: merge mechanically.
            let mut merged = String::new();
            for entry in mailbox.entries() {
                merged.push_str(&format!("## {}\n{}\n\n", entry.author, entry.text));
            }
            if !failed_roles.is_empty() {
                merged.push_str(&format!("(failed roles: {})", failed_roles.join(", ")));
            }
            return Ok(merged.trim_end().to_owned());
        };

        let system = format!(
            "{}\n\n## Team results\n\n{}",
            lead.prompt,
            mailbox.transcript()
        );
        let user = format!(
            "Synthesize the team's results above into a single final answer for \
             this task: {task}{failed_note}"
        );
        let messages = [Message::system(system), Message::user(user)];
        let opts = ChatOptions::for_tier(lead.tier);

        let completion = tokio::select! {
            _ = cancel.cancelled() => return Err(SwarmError::Cancelled),
            result = self.router.chat(&messages, &opts) => {
                result.map_err(|e| SwarmError::LeadFailed {
                    reason: format!("synthesis call failed: {e}"),
                })?
            }
        };

        match completion.content {
            CompletionContent::Text(text) => Ok(text),
            CompletionContent::ToolCalls(_) => Err(SwarmError::LeadFailed {
                reason: "synthesis call returned tool calls instead of text".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Run one transient worker: build its prompt from the role prompt plus the
/// current mailbox transcript, make one model call at the role's tier, and
/// hand back the text.
async fn run_worker(
    router: &ProviderRouter,
    role: &RoleSpec,
    task: &str,
    mailbox: &Mailbox,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<String, String> {
    let mut system = role.prompt.clone();
    let transcript = mailbox.transcript();
    if !transcript.is_empty() {
        system.push_str("\n\n## Peer results so far\n\n");
        system.push_str(&transcript);
    }

    let messages = [Message::system(system), Message::user(task.to_owned())];
    let opts = ChatOptions::for_tier(role.tier);

    let completion: Completion = tokio::select! {
        _ = cancel.cancelled() => return Err("cancelled".into()),
        result = tokio::time::timeout(timeout, router.chat(&messages, &opts)) => {
            match result {
                Err(_) => {
                    return Err(format!(
                        "worker timed out after {}s",
                        timeout.as_secs()
                    ));
                }
                Ok(Err(e)) => return Err(e.to_string()),
                Ok(Ok(completion)) => completion,
            }
        }
    };

    match completion.content {
        CompletionContent::Text(text) => Ok(text),
        CompletionContent::ToolCalls(_) => {
            Err("worker returned tool calls instead of text".into())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmur_provider::backend::TokenSink;
    use murmur_provider::router::ProviderConfig;
    use murmur_provider::types::{ChatRequest, Tier, Usage};
    use murmur_provider::{ChatBackend, ProviderError};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type ResponseFn =
        Box<dyn Fn(&ChatRequest) -> murmur_provider::Result<String> + Send + Sync>;

    /// A backend whose reply is computed from the request, so concurrent
    /// workers each get role-appropriate output.
    struct FnBackend {
        respond: ResponseFn,
        requests: Mutex<Vec<ChatRequest>>,
        /// Sleep before responding when the system prompt contains the
        /// marker; lets tests exercise the worker timeout.
        delay_marker: Option<(String, Duration)>,
    }

    impl FnBackend {
        fn new(respond: ResponseFn) -> Arc<Self> {
            Arc::new(Self {
                respond,
                requests: Mutex::new(Vec::new()),
                delay_marker: None,
            })
        }

        fn with_delay(respond: ResponseFn, marker: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                respond,
                requests: Mutex::new(Vec::new()),
                delay_marker: Some((marker.to_owned(), delay)),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for FnBackend {
        fn id(&self) -> &str {
            "mock"
        }

        async fn chat(&self, request: &ChatRequest) -> murmur_provider::Result<Completion> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some((marker, delay)) = &self.delay_marker {
                let system = request
                    .messages
                    .first()
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                if system.contains(marker.as_str()) {
                    tokio::time::sleep(*delay).await;
                }
            }
            (self.respond)(request).map(|text| Completion {
                content: CompletionContent::Text(text),
                usage: Usage::default(),
                provider: "mock".into(),
                model: request.model.clone(),
            })
        }

        async fn chat_stream(
            &self,
            request: &ChatRequest,
            _on_token: TokenSink<'_>,
        ) -> murmur_provider::Result<Completion> {
            self.chat(request).await
        }
    }

    fn router_with(backend: Arc<FnBackend>) -> ProviderRouter {
        ProviderRouter::new(vec![(
            ProviderConfig {
                id: "mock".into(),
                default_model: "mock-model".into(),
                tier_models: HashMap::new(),
                configured: true,
                tool_capable: true,
                context_window: 128_000,
            },
            backend as _,
        )])
    }

    fn system_text(request: &ChatRequest) -> String {
        request
            .messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn dev_team_runs_waves_and_synthesizes() {
        let backend = FnBackend::new(Box::new(|request| {
            let system = request
                .messages
                .first()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            let user = request
                .messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();

            if user.starts_with("Synthesize") {
                Ok("final: ship it".into())
            } else if system.contains("You are the lead") {
                Ok("plan: do the thing".into())
            } else if system.contains("researcher") {
                Ok("facts: found them".into())
            } else if system.contains("coder") {
                Ok("code: fn main() {}".into())
            } else {
                Ok("review: looks good".into())
            }
        }));

        let orchestrator = SwarmOrchestrator::new(router_with(backend.clone()));
        let outcome = orchestrator
            .run(
                "cli_repl_1",
                "build the widget",
                &Preset::dev_team(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.result, "final: ship it");
        assert!(outcome.failed_roles.is_empty());
        // One mailbox entry per worker, in wave order: lead first,
        // reviewer last.
        assert_eq!(outcome.mailbox.len(), 4);
        assert_eq!(outcome.mailbox[0].author, "lead");
        assert_eq!(outcome.mailbox[3].author, "reviewer");

        // Later waves saw earlier output in their system prompt.
        let requests = backend.requests();
        let reviewer_request = requests
            .iter()
            .find(|r| system_text(r).contains("You are the reviewer"))
            .expect("reviewer request");
        assert!(system_text(reviewer_request).contains("fn main() {}"));
    }

    #[tokio::test]
    async fn failed_non_lead_role_is_noted() {
        let backend = FnBackend::new(Box::new(|request| {
            let system = request
                .messages
                .first()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            if system.contains("flaky") {
                // Hard error so the router does not retry.
                Err(ProviderError::InvalidRequest {
                    provider: "mock".into(),
                    reason: "boom".into(),
                })
            } else {
                Ok("steady output".into())
            }
        }));

        let preset = Preset::new(
            "no_lead",
            vec![
                RoleSpec::new("steady", "steady worker", Tier::Utility),
                RoleSpec::new("broken", "flaky worker", Tier::Utility),
            ],
        );

        let orchestrator = SwarmOrchestrator::new(router_with(backend));
        let outcome = orchestrator
            .run("s1", "task", &preset, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failed_roles, vec!["broken".to_owned()]);
        assert_eq!(outcome.mailbox.len(), 1);
        // The mechanical merge notes the failure.
        assert!(outcome.result.contains("failed roles: broken"));
        assert!(outcome.result.contains("steady output"));
    }

    #[tokio::test]
    async fn lead_failure_fails_the_swarm() {
        let backend = FnBackend::new(Box::new(|request| {
            let system = request
                .messages
                .first()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            if system.contains("You are the lead") {
                Err(ProviderError::InvalidRequest {
                    provider: "mock".into(),
                    reason: "lead down".into(),
                })
            } else {
                Ok("irrelevant".into())
            }
        }));

        let orchestrator = SwarmOrchestrator::new(router_with(backend));
        let result = orchestrator
            .run(
                "s1",
                "task",
                &Preset::dev_team(),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(SwarmError::LeadFailed { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_the_swarm() {
        let backend = FnBackend::new(Box::new(|_| Ok("never used".into())));
        let orchestrator = SwarmOrchestrator::new(router_with(backend));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator
            .run("s1", "task", &Preset::dev_team(), cancel)
            .await;
        assert!(matches!(result, Err(SwarmError::Cancelled)));
    }

    #[tokio::test]
    async fn worker_timeout_marks_role_failed() {
        let backend = FnBackend::with_delay(
            Box::new(|_| Ok("done".into())),
            "slow",
            Duration::from_millis(500),
        );

        let preset = Preset::new(
            "timeouts",
            vec![
                RoleSpec::new("fast", "fast worker", Tier::Utility),
                RoleSpec::new("sluggish", "slow worker", Tier::Utility),
            ],
        );

        let orchestrator = SwarmOrchestrator::new(router_with(backend))
            .with_worker_timeout(Duration::from_millis(50));
        let outcome = orchestrator
            .run("s1", "task", &preset, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failed_roles, vec!["sluggish".to_owned()]);
        assert_eq!(outcome.mailbox.len(), 1);
        assert_eq!(outcome.mailbox[0].author, "fast");
    }
}
