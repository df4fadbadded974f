use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use maplit::btreemap;

use crate::actions::{Action, ActionOutput, ActionRegistry, ResolvedStep};
use crate::dsl::ParamValue;
use crate::error::ActionError;
use crate::store::memory::MemoryStore;
use crate::store::ScenarioStore;
use crate::types::{ExecutionStatus, NewScenario, StepOutcome, TaskStatus};

use super::{Engine, ExecutionContext};

/// Action stub returning a fixed output.
struct StubAction {
    output: ActionOutput,
}

#[async_trait]
impl Action for StubAction {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _step: &ResolvedStep,
    ) -> Result<ActionOutput, ActionError> {
        Ok(self.output.clone())
    }
}

/// Action stub that always fails, with an optional captured output.
struct FailingAction {
    output: Option<ActionOutput>,
}

#[async_trait]
impl Action for FailingAction {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _step: &ResolvedStep,
    ) -> Result<ActionOutput, ActionError> {
        Err(ActionError {
            message: "upstream exploded".to_string(),
            output: self.output.clone(),
        })
    }
}

async fn scenario_with(store: &MemoryStore, steps: serde_json::Value) -> crate::types::Scenario {
    let document = serde_json::json!({
        "trigger": {"type": "manual", "value": ""},
        "steps": steps
    })
    .to_string();

    store
        .create_scenario(NewScenario {
            merchant_id: 1,
            name: "test".to_string(),
            description: String::new(),
            document,
            trigger_kind: "manual".to_string(),
            trigger_value: String::new(),
        })
        .await
        .unwrap()
}

fn engine(store: &Arc<MemoryStore>, registry: ActionRegistry) -> Engine {
    Engine::new(store.clone(), Arc::new(registry))
}

fn payload(json: &str) -> ParamValue {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn runs_inline_steps_to_completion() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "v", "type": "set_variable",
             "params": {"name": "greeting", "value": "hi {{userName}}"}},
            {"id": "l", "type": "log", "params": {"message": "{{greeting}}"}}
        ]),
    )
    .await;

    let execution_id = engine
        .start(&scenario, payload(r#"{"userName": "Ann"}"#))
        .await
        .unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables["greeting"], "hi Ann");
    assert_eq!(execution.variables["userName"], "Ann");
    assert!(execution.finished_at.is_some());

    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.outcome == StepOutcome::Success));
    assert_eq!(logs[0].step_id, "v");
    assert_eq!(logs[1].step_id, "l");
}

#[tokio::test]
async fn declared_variables_do_not_overwrite_payload_values() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let document = serde_json::json!({
        "trigger": {"type": "manual", "value": ""},
        "variables": {"greeting": "hello {{name}}", "name": "fallback"},
        "steps": [{"id": "l", "type": "log", "params": {"message": "x"}}]
    })
    .to_string();
    let scenario = store
        .create_scenario(NewScenario {
            merchant_id: 1,
            name: "vars".to_string(),
            description: String::new(),
            document,
            trigger_kind: "manual".to_string(),
            trigger_value: String::new(),
        })
        .await
        .unwrap();

    let execution_id = engine
        .start(&scenario, payload(r#"{"name": "Ann"}"#))
        .await
        .unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    // Declared variable rendered against the flattened payload.
    assert_eq!(execution.variables["greeting"], "hello Ann");
    // The payload-derived value wins over the declared default.
    assert_eq!(execution.variables["name"], "Ann");
}

#[tokio::test]
async fn condition_jumps_to_then_target_regardless_of_position() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "c", "type": "condition",
             "params": {"if": "{{x}} == 1", "then": "b", "else": "end"}},
            {"id": "a", "type": "set_variable", "params": {"name": "ran_a", "value": "yes"}},
            {"id": "b", "type": "set_variable", "params": {"name": "ran_b", "value": "yes"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, payload(r#"{"x": 1}"#)).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables.get("ran_b").map(String::as_str), Some("yes"));
    // Step "a" was skipped over by the jump.
    assert!(!execution.variables.contains_key("ran_a"));

    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs[0].step_id, "c");
    assert_eq!(logs[1].step_id, "b");
}

#[tokio::test]
async fn condition_end_target_completes_immediately() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "c", "type": "condition",
             "params": {"if": "{{x}} == 1", "then": "b", "else": "end"}},
            {"id": "b", "type": "set_variable", "params": {"name": "ran_b", "value": "yes"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, payload(r#"{"x": 2}"#)).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.current_step, "c");
    assert!(!execution.variables.contains_key("ran_b"));
    assert_eq!(store.list_step_logs(&execution_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn condition_with_unknown_target_falls_through_sequentially() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "c", "type": "condition",
             "params": {"if": "1 == 1", "then": "missing", "else": "end"}},
            {"id": "a", "type": "set_variable", "params": {"name": "ran_a", "value": "yes"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables.get("ran_a").map(String::as_str), Some("yes"));
}

#[tokio::test]
async fn delay_suspends_and_resume_continues() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "d", "type": "delay", "params": {"duration": "1m"}},
            {"id": "l", "type": "log", "params": {"message": "done"}}
        ]),
    )
    .await;

    let started_at = Utc::now();
    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Waiting);

    let tasks = store
        .due_tasks(started_at + chrono::Duration::seconds(300))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].resume_step_id, "l");
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    let wake_delta = (tasks[0].wake_at - started_at).num_seconds();
    assert!((45..=75).contains(&wake_delta), "wake in {wake_delta}s");

    // The delay itself logged success and nothing else ran yet.
    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].step_id, "d");

    engine.resume(&execution_id, "l").await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].step_id, "l");
}

#[tokio::test]
async fn invalid_delay_duration_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "d", "type": "delay", "params": {"duration": "whenever"}},
            {"id": "l", "type": "log", "params": {"message": "done"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs[0].outcome, StepOutcome::Skipped);
    assert_eq!(logs[0].error, "invalid duration");
    assert_eq!(logs[1].step_id, "l");
    assert!(store.due_tasks(Utc::now() + chrono::Duration::days(2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn trailing_delay_completes_without_a_task() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "d", "type": "delay", "params": {"duration": "1m"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(store.due_tasks(Utc::now() + chrono::Duration::days(2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn unregistered_step_type_fails_the_execution() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "u", "type": "unibee_api", "params": {"action": "get_user"}},
            {"id": "l", "type": "log", "params": {"message": "never"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.contains("unknown step type: unibee_api"));

    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, StepOutcome::Failed);
}

#[tokio::test]
async fn action_failure_halts_and_keeps_captured_output() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = ActionRegistry::new();
    let mut captured = ActionOutput::new();
    captured.insert("status_code".to_string(), ParamValue::from(500i64));
    registry.register(
        "http_request",
        Arc::new(FailingAction {
            output: Some(captured),
        }),
    );
    let engine = engine(&store, registry);
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "h", "type": "http_request", "params": {"url": "https://example.com"}},
            {"id": "l", "type": "log", "params": {"message": "never"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error, "upstream exploded");
    assert_eq!(execution.current_step, "h");

    // Exactly one failed step log carrying the captured output; the
    // following step never ran.
    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, StepOutcome::Failed);
    assert_eq!(logs[0].output["status_code"], serde_json::json!(500));
}

#[tokio::test(flavor = "multi_thread")]
async fn http_500_fails_the_execution_end_to_end() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let body = r#"{"error": "boom"}"#;
        let response = format!(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
    });

    let store = Arc::new(MemoryStore::new());
    let mut registry = ActionRegistry::new();
    registry.register(
        "http_request",
        Arc::new(
            crate::actions::HttpRequestAction::new(&crate::config::HttpSettings::default())
                .unwrap(),
        ),
    );
    let engine = engine(&store, registry);
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "h", "type": "http_request", "params": {"url": format!("http://{addr}/")}},
            {"id": "l", "type": "log", "params": {"message": "never"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.contains("server returned 500"));

    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].outcome, StepOutcome::Failed);
    assert_eq!(logs[0].output["status_code"], serde_json::json!(500));
}

#[tokio::test]
async fn action_output_strings_merge_into_variables() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = ActionRegistry::new();
    let mut output = ActionOutput::new();
    output.insert("token".to_string(), ParamValue::from("abc"));
    output.insert("attempts".to_string(), ParamValue::from(3i64));
    registry.register("http_request", Arc::new(StubAction { output }));
    let engine = engine(&store, registry);
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "h", "type": "http_request", "params": {"url": "https://example.com"}},
            {"id": "l", "type": "log", "params": {"message": "token={{token}}"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables["token"], "abc");
    // Non-string output values are logged but never merged.
    assert!(!execution.variables.contains_key("attempts"));

    let logs = store.list_step_logs(&execution_id).await.unwrap();
    assert_eq!(logs[0].output["attempts"], serde_json::json!(3));
}

#[tokio::test]
async fn resume_restores_persisted_variables() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "v", "type": "set_variable", "params": {"name": "token", "value": "abc"}},
            {"id": "d", "type": "delay", "params": {"duration": "30s"}},
            {"id": "w", "type": "set_variable", "params": {"name": "after", "value": "{{token}}-resumed"}}
        ]),
    )
    .await;

    let execution_id = engine
        .start(&scenario, payload(r#"{"chat_id": 5}"#))
        .await
        .unwrap();
    assert_eq!(
        store.get_execution(&execution_id).await.unwrap().unwrap().status,
        ExecutionStatus::Waiting
    );

    engine.resume(&execution_id, "w").await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    // Variables set before the suspension survived it.
    assert_eq!(execution.variables["after"], "abc-resumed");
    assert_eq!(execution.variables["chat_id"], "5");
}

#[tokio::test]
async fn resume_of_missing_execution_errors() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let err = engine.resume("ghost", "x").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn variables_snapshot_tracks_every_step() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, ActionRegistry::new());
    let scenario = scenario_with(
        &store,
        serde_json::json!([
            {"id": "v1", "type": "set_variable", "params": {"name": "a", "value": "1"}},
            {"id": "v2", "type": "set_variable", "params": {"name": "b", "value": "{{a}}2"}}
        ]),
    )
    .await;

    let execution_id = engine.start(&scenario, ParamValue::object()).await.unwrap();

    let execution = store.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(
        execution.variables,
        btreemap! {
            "a".to_string() => "1".to_string(),
            "b".to_string() => "12".to_string(),
        }
    );
}
