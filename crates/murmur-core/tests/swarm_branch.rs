//! The loop's swarm branch: caller-directed and auto fan-out.

mod common;

use tokio_util::sync::CancellationToken;

use common::{ScriptBackend, build_runtime_with_swarm, text_step};
use murmur_core::config::RuntimeConfig;
use murmur_core::{AgentError, ProcessOptions, ProcessOutcome, SessionState};
use murmur_kernel::EventKind;
use murmur_provider::Tier;
use murmur_swarm::{Preset, RoleSpec};

fn pair_preset() -> Preset {
    Preset::new(
        "pair",
        vec![
            RoleSpec::new("first", "You go first.", Tier::Utility),
            RoleSpec::new("second", "You go second.", Tier::Utility).after("first"),
        ],
    )
}

fn state() -> SessionState {
    SessionState::new("cli_repl_u1", "cli", "u1", "repl", false, Vec::new())
}

#[tokio::test]
async fn metadata_directed_swarm_merges_worker_output() {
    let backend = ScriptBackend::new(vec![text_step("alpha out"), text_step("beta out")]);
    let harness = build_runtime_with_swarm(backend.clone(), RuntimeConfig::default()).await;
    harness.runtime.register_preset(pair_preset());

    let mut session = state();
    let options = ProcessOptions {
        swarm_preset: Some("pair".into()),
        ..Default::default()
    };
    let outcome = harness
        .runtime
        .process_message(
            &mut session,
            "split this work across the team",
            &options,
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    match outcome {
        ProcessOutcome::Reply { text, .. } => {
            assert!(text.contains("alpha out"));
            assert!(text.contains("beta out"));
        }
        other => panic!("expected Reply, got {other:?}"),
    }

    // One model call per worker; no lead, so the merge was mechanical.
    assert_eq!(backend.request_count(), 2);

    let responses = harness.events.of_kind(EventKind::AgentResponse);
    assert_eq!(responses.len(), 1);
    assert!(responses[0]["swarm_id"].is_string());

    // The merged result was persisted as an assistant turn.
    let turns = harness
        .runtime
        .store()
        .load_session("cli_repl_u1")
        .await
        .unwrap();
    assert_eq!(turns.last().unwrap().role, "assistant");
    assert!(turns.last().unwrap().content.contains("alpha out"));
}

#[tokio::test]
async fn unknown_preset_is_an_input_error() {
    let backend = ScriptBackend::new(vec![]);
    let harness = build_runtime_with_swarm(backend, RuntimeConfig::default()).await;

    let mut session = state();
    let options = ProcessOptions {
        swarm_preset: Some("ghost-team".into()),
        ..Default::default()
    };
    let result = harness
        .runtime
        .process_message(
            &mut session,
            "split this work across the team",
            &options,
            true,
            &CancellationToken::new(),
        )
        .await;

    match result {
        Err(AgentError::UnknownPreset { name }) => assert_eq!(name, "ghost-team"),
        other => panic!("expected UnknownPreset, got {other:?}"),
    }
}

#[tokio::test]
async fn heavyweight_build_tasks_auto_swarm() {
    let backend = ScriptBackend::new(vec![text_step("alpha out"), text_step("beta out")]);
    let mut config = RuntimeConfig::default();
    config.session.auto_swarm_preset = Some("pair".into());
    let harness = build_runtime_with_swarm(backend.clone(), config).await;
    harness.runtime.register_preset(pair_preset());

    let mut session = state();
    let outcome = harness
        .runtime
        .process_message(
            &mut session,
            "build the complete ingestion pipeline with parsers, storage, retries, \
             metrics hooks and integration tests for every stage of the flow",
            &ProcessOptions::default(),
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessOutcome::Reply { .. }));
    assert_eq!(backend.request_count(), 2);
}

#[tokio::test]
async fn light_tasks_stay_in_the_single_agent_loop() {
    let backend = ScriptBackend::new(vec![text_step("just an answer")]);
    let mut config = RuntimeConfig::default();
    config.session.auto_swarm_preset = Some("pair".into());
    let harness = build_runtime_with_swarm(backend.clone(), config).await;
    harness.runtime.register_preset(pair_preset());

    let mut session = state();
    let outcome = harness
        .runtime
        .process_message(
            &mut session,
            "build a tiny helper script",
            &ProcessOptions::default(),
            true,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    match outcome {
        ProcessOutcome::Reply { text, .. } => assert_eq!(text, "just an answer"),
        other => panic!("expected Reply, got {other:?}"),
    }
    // One call: the regular loop, not two workers.
    assert_eq!(backend.request_count(), 1);
}
