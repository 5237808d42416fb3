//! End-to-end runs of the workflow engine against scripted tools and oracles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value, json};
use stepwise_core::storage::InMemoryKvStore;
use stepwise_core::template::TemplateManager;
use stepwise_core::tool::{ToolError, ToolRegistry};
use stepwise_core::workflow::{Engine, EngineError, NoopOracle, OracleError, RemedyOracle};
use stepwise_types::config::EngineConfig;
use stepwise_types::remedy::{Diagnosis, RemedyRequest};
use stepwise_types::tool::{ToolContext, ToolResponse};
use stepwise_types::workflow::{
    ExecutionStatus, FailureKind, SHARED_OWNER, StepStatus, TemplateOrigin, WorkflowStep,
    WorkflowTemplate,
};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Scripted tools
// ---------------------------------------------------------------------------

type Handler = Box<dyn Fn(&Map<String, Value>) -> Result<ToolResponse, ToolError> + Send + Sync>;
type CallLog = Arc<Mutex<Vec<(String, Map<String, Value>)>>>;

/// Holds a capability's call open until released.
#[derive(Clone)]
struct Gate {
    capability: String,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    fn new(capability: &str) -> Self {
        Self {
            capability: capability.to_string(),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct ScriptedTools {
    handlers: HashMap<String, Handler>,
    schemas: HashMap<String, Value>,
    calls: CallLog,
    gate: Option<Gate>,
}

impl ScriptedTools {
    fn new() -> Self {
        Self::default()
    }

    fn on(
        mut self,
        capability: &str,
        handler: impl Fn(&Map<String, Value>) -> Result<ToolResponse, ToolError> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(capability.to_string(), Box::new(handler));
        self
    }

    fn returning(self, capability: &str, data: Value) -> Self {
        self.on(capability, move |_| Ok(ToolResponse::ok(data.clone())))
    }

    fn with_schema(mut self, capability: &str, schema: Value) -> Self {
        self.schemas.insert(capability.to_string(), schema);
        self
    }

    fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    fn call_log(&self) -> CallLog {
        self.calls.clone()
    }
}

impl ToolRegistry for ScriptedTools {
    async fn execute(
        &self,
        capability: &str,
        input: Map<String, Value>,
        _context: ToolContext,
    ) -> Result<ToolResponse, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((capability.to_string(), input.clone()));

        if let Some(gate) = self.gate.as_ref().filter(|g| g.capability == capability) {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        match self.handlers.get(capability) {
            Some(handler) => handler(&input),
            None => Err(ToolError::NotFound(capability.to_string())),
        }
    }

    async fn input_schema(&self, capability: &str) -> Option<Value> {
        self.schemas.get(capability).cloned()
    }
}

fn capabilities(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
}

// ---------------------------------------------------------------------------
// Scripted oracle
// ---------------------------------------------------------------------------

struct FixedOracle {
    updated_input: Value,
    confidence: f64,
    consulted: Arc<AtomicUsize>,
}

impl FixedOracle {
    fn new(updated_input: Value, confidence: f64) -> Self {
        Self {
            updated_input,
            confidence,
            consulted: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl RemedyOracle for FixedOracle {
    async fn diagnose(&self, _request: &RemedyRequest) -> Result<Diagnosis, OracleError> {
        self.consulted.fetch_add(1, Ordering::SeqCst);
        Ok(Diagnosis {
            root_cause: "wrong page id".to_string(),
            remedy_strategy: "use the id returned by the create step".to_string(),
            updated_input: self.updated_input.as_object().cloned().unwrap_or_default(),
            confidence: self.confidence,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type TestEngine<O> = Engine<InMemoryKvStore, ScriptedTools, O>;

fn engine<O: RemedyOracle>(tools: ScriptedTools, oracle: O, config: EngineConfig) -> Arc<TestEngine<O>> {
    let manager = Arc::new(TemplateManager::new(Arc::new(InMemoryKvStore::new())));
    Arc::new(Engine::new(manager, tools, oracle, config))
}

fn step(id: &str, capability: &str, input: Value) -> WorkflowStep {
    WorkflowStep::new(id, "test", capability, input)
}

async fn saved<O: RemedyOracle>(
    engine: &Arc<TestEngine<O>>,
    owner: &str,
    steps: Vec<WorkflowStep>,
) -> WorkflowTemplate {
    let template = WorkflowTemplate::new("test flow", owner, steps);
    engine.manager().save(&template).await.unwrap();
    template
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_three_step_flow_binds_results_and_records_stats() {
    let tools = ScriptedTools::new()
        .returning("create_page", json!({"data": {"pageId": "p-1"}, "status": "ok"}))
        .on("add_block", |input| {
            Ok(ToolResponse::ok(json!({"block_id": "b-1", "page": input["page_id"]})))
        })
        .returning("publish", json!({"url": "https://example.test/p-1"}));
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let template = saved(
        &engine,
        "alice",
        vec![
            step("create", "create_page", json!({"title": "{{title}}"})),
            step("block", "add_block", json!({"page_id": "$step_1.page_id", "text": "Hello {{who}}"}))
                .depends_on("create"),
            step("publish", "publish", json!({"page_id": "$step_1.page_id", "block": "{{block.block_id}}"}))
                .depends_on("block"),
        ],
    )
    .await;

    let run = engine
        .execute(&template.id, "alice", json!({"title": "Notes", "who": "Bob"}))
        .await
        .unwrap();

    assert_eq!(run.status, ExecutionStatus::Completed);
    assert!(run.error.is_none());
    assert_eq!(capabilities(&log), vec!["create_page", "add_block", "publish"]);

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls[0].1["title"], json!("Notes"));
    assert_eq!(calls[1].1["page_id"], json!("p-1"));
    assert_eq!(calls[1].1["text"], json!("Hello Bob"));
    assert_eq!(calls[2].1["block"], json!("b-1"));

    assert_eq!(run.output, Some(json!({"url": "https://example.test/p-1"})));
    assert!(run.steps.iter().all(|s| s.attempt_count == 1));

    let stats = engine.manager().load(&template.id, "alice").await.unwrap().stats;
    assert_eq!(stats.total_executions, 1);
    assert_eq!(stats.successful_executions, 1);
    assert_eq!(stats.success_rate, 1.0);

    assert_eq!(engine.history().get(&run.id).await.unwrap().status, ExecutionStatus::Completed);
    assert_eq!(engine.active_runs(), 0);
}

#[tokio::test]
async fn test_output_schema_collects_declared_keys() {
    let tools = ScriptedTools::new()
        .returning("create_page", json!({"page_id": "p-1", "title": "Notes"}))
        .returning("publish", json!({"result": {"url": "https://example.test/p-1"}}));
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let mut template = WorkflowTemplate::new(
        "publish flow",
        "alice",
        vec![
            step("create", "create_page", json!({})),
            step("publish", "publish", json!({})),
        ],
    );
    template.output_schema = Some(json!({"properties": {"page_id": {}, "url": {}}}));
    engine.manager().save(&template).await.unwrap();

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(
        run.output,
        Some(json!({"page_id": "p-1", "url": "https://example.test/p-1"}))
    );
}

// ---------------------------------------------------------------------------
// Placeholder resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_list_result_disambiguated_by_step_name() {
    let tools = ScriptedTools::new()
        .returning(
            "list_pages",
            json!({"pages": [
                {"name": "Dashboard Alpha", "id": 7},
                {"name": "Dashboard Beta", "id": 9}
            ]}),
        )
        .returning("share", json!({"shared": true}));
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let template = saved(
        &engine,
        "alice",
        vec![
            step("list", "list_pages", json!({})),
            step("share", "share", json!({"page_id": "$step_1.page_id"}))
                .with_name("Share the Beta dashboard")
                .depends_on("list"),
        ],
    )
    .await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(log.lock().unwrap()[1].1["page_id"], json!(9));
}

#[tokio::test]
async fn test_single_element_list_resolves_without_context() {
    let tools = ScriptedTools::new()
        .returning("find", json!({"items": [{"id": 42}]}))
        .returning("open", json!({}));
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let template = saved(
        &engine,
        "alice",
        vec![
            step("find", "find", json!({})),
            step("open", "open", json!({"item_id": "$step_1.item_id"})),
        ],
    )
    .await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(log.lock().unwrap()[1].1["item_id"], json!(42));
}

#[tokio::test]
async fn test_strict_mode_fails_ambiguous_step() {
    let tools = ScriptedTools::new()
        .returning(
            "list_pages",
            json!({"pages": [{"name": "Alpha", "id": 1}, {"name": "Gamma", "id": 2}]}),
        )
        .returning("share", json!({}));
    let log = tools.call_log();
    let config = EngineConfig {
        strict_disambiguation: true,
        ..EngineConfig::default()
    };
    let engine = engine(tools, NoopOracle, config);

    let template = saved(
        &engine,
        "alice",
        vec![
            step("list", "list_pages", json!({})),
            step("share", "share", json!({"page_id": "$step_1.page_id"})).with_name("Zeta"),
        ],
    )
    .await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Failed);
    let error = run.error.unwrap();
    assert_eq!(error.kind, FailureKind::StepExecutionError);
    assert_eq!(error.step_id.as_deref(), Some("share"));
    assert_eq!(capabilities(&log), vec!["list_pages"]);
}

// ---------------------------------------------------------------------------
// Dependencies and conditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unmet_dependency_fails_without_invoking_tool() {
    let tools = ScriptedTools::new()
        .returning("a", json!({}))
        .returning("b", json!({}))
        .returning("c", json!({}));
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    // "b" depends on "c", which is declared after it.
    let template = saved(
        &engine,
        "alice",
        vec![
            step("a", "a", json!({})),
            step("b", "b", json!({})).depends_on("c"),
            step("c", "c", json!({})),
        ],
    )
    .await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Failed);

    let error = run.error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::DependencyUnmet);
    assert_eq!(error.step_id.as_deref(), Some("b"));
    assert_eq!(capabilities(&log), vec!["a"]);

    let b = run.step("b").unwrap();
    assert_eq!(b.status, StepStatus::Failed);
    assert_eq!(b.attempt_count, 0);
    assert_eq!(run.step("a").unwrap().status, StepStatus::Completed);
    assert_eq!(run.step("c").unwrap().status, StepStatus::Pending);

    let stats = engine.manager().load(&template.id, "alice").await.unwrap().stats;
    assert_eq!(stats.total_executions, 1);
    assert_eq!(stats.successful_executions, 0);
}

#[tokio::test]
async fn test_false_condition_skips_step_and_satisfies_dependents() {
    let tools = ScriptedTools::new()
        .returning("draft", json!({"id": "d-1"}))
        .returning("notify", json!({}))
        .returning("archive", json!({"archived": true}));
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let mut notify = step("notify", "notify", json!({})).depends_on("draft");
    notify.condition = Some("input.notify == true".to_string());
    let template = saved(
        &engine,
        "alice",
        vec![
            step("draft", "draft", json!({})),
            notify,
            step("archive", "archive", json!({})).depends_on("notify"),
        ],
    )
    .await;

    let run = engine
        .execute(&template.id, "alice", json!({"notify": false}))
        .await
        .unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(run.step("notify").unwrap().status, StepStatus::Skipped);
    assert_eq!(capabilities(&log), vec!["draft", "archive"]);
}

// ---------------------------------------------------------------------------
// Failures and remedies
// ---------------------------------------------------------------------------

fn publish_requiring_p1() -> ScriptedTools {
    ScriptedTools::new()
        .on("publish", |input| {
            if input.get("page_id") == Some(&json!("p-1")) {
                Ok(ToolResponse::ok(json!({"published": true})))
            } else {
                Ok(ToolResponse::fail("page not found"))
            }
        })
        .with_schema("publish", json!({"properties": {"page_id": {"type": "string"}}}))
}

#[tokio::test]
async fn test_confident_remedy_is_applied_on_retry() {
    let tools = publish_requiring_p1();
    let log = tools.call_log();
    let oracle = FixedOracle::new(json!({"page_id": "p-1", "force": true}), 0.9);
    let consulted = oracle.consulted.clone();
    let engine = engine(tools, oracle, EngineConfig::default());

    let template = saved(
        &engine,
        "alice",
        vec![step("publish", "publish", json!({"page_id": "p-0"}))],
    )
    .await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);

    let publish = run.step("publish").unwrap();
    assert_eq!(publish.attempt_count, 2);
    assert_eq!(publish.remedies.len(), 1);
    assert!(publish.remedies[0].applied);
    assert_eq!(consulted.load(Ordering::SeqCst), 1);

    // Undeclared "force" is filtered out.
    let calls = log.lock().unwrap().clone();
    assert_eq!(calls[1].1, json!({"page_id": "p-1"}).as_object().cloned().unwrap());
}

#[tokio::test]
async fn test_remedied_first_step_feeds_later_steps() {
    let tools = publish_requiring_p1()
        .returning("notify", json!({"sent": true}))
        .on("archive", |input| Ok(ToolResponse::ok(json!({"archived": input["page"]}))));
    let log = tools.call_log();
    let oracle = FixedOracle::new(json!({"page_id": "p-1"}), 0.9);
    let engine = engine(tools, oracle, EngineConfig::default());

    let template = saved(
        &engine,
        "alice",
        vec![
            step("a", "publish", json!({"page_id": "{{page}}"})),
            step("b", "notify", json!({"text": "published"})).depends_on("a"),
            step("c", "archive", json!({"page": "{{a.published}}"})).depends_on("b"),
        ],
    )
    .await;

    let run = engine
        .execute(&template.id, "alice", json!({"page": "p-0"}))
        .await
        .unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(run.steps.len(), 3);
    assert_eq!(run.step("a").unwrap().attempt_count, 2);
    assert_eq!(run.step("b").unwrap().attempt_count, 1);
    assert_eq!(run.step("c").unwrap().attempt_count, 1);
    assert_eq!(
        capabilities(&log),
        vec!["publish", "publish", "notify", "archive"]
    );
    assert_eq!(run.output, Some(json!({"archived": true})));
}

#[tokio::test]
async fn test_low_confidence_remedy_retries_unchanged_until_ceiling() {
    let tools = publish_requiring_p1();
    let log = tools.call_log();
    let oracle = FixedOracle::new(json!({"page_id": "p-1"}), 0.4);
    let engine = engine(tools, oracle, EngineConfig::default());

    let template = saved(
        &engine,
        "alice",
        vec![step("publish", "publish", json!({"page_id": "p-0"}))],
    )
    .await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Failed);

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|(_, input)| input["page_id"] == json!("p-0")));

    let publish = run.step("publish").unwrap();
    assert_eq!(publish.attempt_count, 3);
    assert_eq!(publish.remedies.len(), 2);
    assert!(publish
        .remedies
        .iter()
        .all(|r| !r.applied && r.rejection == Some(FailureKind::RemedyLowConfidence)));

    let error = run.error.unwrap();
    assert_eq!(error.kind, FailureKind::MaxAttemptsExceeded);
    assert!(error.message.contains("page not found"));
}

#[tokio::test]
async fn test_step_attempt_limit_is_capped_by_config() {
    let tools = publish_requiring_p1();
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let mut publish = step("publish", "publish", json!({"page_id": "p-0"}));
    publish.max_attempts = Some(10);
    let template = saved(&engine, "alice", vec![publish]).await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(log.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_tool_fails_without_retry() {
    let tools = ScriptedTools::new();
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let template = saved(&engine, "alice", vec![step("x", "nonexistent", json!({}))]).await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Failed);
    assert_eq!(run.error.unwrap().kind, FailureKind::ToolNotFound);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_slow_tool_times_out() {
    let tools = ScriptedTools::new()
        .returning("slow", json!({}))
        .with_gate(Gate::new("slow"));
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let mut slow = step("slow", "slow", json!({}));
    slow.timeout_secs = Some(1);
    slow.max_attempts = Some(1);
    let template = saved(&engine, "alice", vec![slow]).await;

    let run = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Failed);
    let step = run.step("slow").unwrap();
    assert_eq!(step.error_kind, Some(FailureKind::MaxAttemptsExceeded));
    assert!(run.error.unwrap().message.contains("step_timeout"));
}

#[tokio::test]
async fn test_unknown_template_is_an_error() {
    let engine = engine(ScriptedTools::new(), NoopOracle, EngineConfig::default());
    let err = engine.execute("missing", "alice", json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::TemplateNotFound(ref id) if id == "missing"));
    assert_eq!(err.kind(), Some(FailureKind::TemplateNotFound));
}

#[tokio::test]
async fn test_run_rejects_execution_of_another_template() {
    let tools = ScriptedTools::new().returning("a", json!({})).returning("b", json!({}));
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());
    let short = saved(&engine, "alice", vec![step("a", "a", json!({}))]).await;
    let long = saved(
        &engine,
        "alice",
        vec![step("a", "a", json!({})), step("b", "b", json!({}))],
    )
    .await;

    let execution = engine.prepare(&short, "alice", json!({})).unwrap();
    let err = engine.run(&long, execution).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTemplate(_)));

    let mut grown = short.clone();
    grown.steps.push(step("b", "b", json!({})));
    let execution = engine.prepare(&short, "alice", json!({})).unwrap();
    let err = engine.run(&grown, execution).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTemplate(_)));

    assert_eq!(engine.active_runs(), 0);
    assert!(capabilities(&log).is_empty());
}

// ---------------------------------------------------------------------------
// Run control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_during_step_stops_before_next_step() {
    let gate = Gate::new("a");
    let tools = ScriptedTools::new()
        .returning("a", json!({"ok": true}))
        .returning("b", json!({}))
        .with_gate(gate.clone());
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());
    let template = saved(
        &engine,
        "alice",
        vec![step("a", "a", json!({})), step("b", "b", json!({}))],
    )
    .await;

    let execution = engine.prepare(&template, "alice", json!({})).unwrap();
    let run_id = execution.id;
    let handle = {
        let engine = engine.clone();
        let template = template.clone();
        tokio::spawn(async move { engine.run(&template, execution).await })
    };

    gate.entered.notified().await;
    engine.cancel(&run_id).unwrap();
    gate.release.notify_one();

    let run = handle.await.unwrap().unwrap();
    assert_eq!(run.status, ExecutionStatus::Cancelled);
    assert_eq!(run.step("a").unwrap().status, StepStatus::Completed);
    assert_eq!(run.step("b").unwrap().status, StepStatus::Pending);
    assert_eq!(capabilities(&log), vec!["a"]);

    // Cancelled runs do not count toward statistics.
    let stats = engine.manager().load(&template.id, "alice").await.unwrap().stats;
    assert_eq!(stats.total_executions, 0);
    assert!(engine.cancel(&run_id).is_err());
}

#[tokio::test]
async fn test_pause_holds_run_until_resumed() {
    let gate = Gate::new("a");
    let tools = ScriptedTools::new()
        .returning("a", json!({}))
        .returning("b", json!({"done": true}))
        .with_gate(gate.clone());
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());
    let template = saved(
        &engine,
        "alice",
        vec![step("a", "a", json!({})), step("b", "b", json!({}))],
    )
    .await;

    let execution = engine.prepare(&template, "alice", json!({})).unwrap();
    let run_id = execution.id;
    let mut status = engine.subscribe_status(&run_id).unwrap();
    let handle = {
        let engine = engine.clone();
        let template = template.clone();
        tokio::spawn(async move { engine.run(&template, execution).await })
    };

    gate.entered.notified().await;
    engine.pause(&run_id).unwrap();
    gate.release.notify_one();

    status
        .wait_for(|s| *s == ExecutionStatus::Paused)
        .await
        .unwrap();
    assert_eq!(engine.status(&run_id), Some(ExecutionStatus::Paused));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(capabilities(&log), vec!["a"]);

    engine.resume(&run_id).unwrap();
    let run = handle.await.unwrap().unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(capabilities(&log), vec!["a", "b"]);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let gate = Gate::new("a");
    let tools = ScriptedTools::new()
        .returning("a", json!({}))
        .returning("b", json!({}))
        .with_gate(gate.clone());
    let engine = engine(tools, NoopOracle, EngineConfig::default());
    let template = saved(
        &engine,
        "alice",
        vec![step("a", "a", json!({})), step("b", "b", json!({}))],
    )
    .await;

    let execution = engine.prepare(&template, "alice", json!({})).unwrap();
    let run_id = execution.id;
    let mut status = engine.subscribe_status(&run_id).unwrap();
    let handle = {
        let engine = engine.clone();
        let template = template.clone();
        tokio::spawn(async move { engine.run(&template, execution).await })
    };

    gate.entered.notified().await;
    engine.pause(&run_id).unwrap();
    gate.release.notify_one();
    status
        .wait_for(|s| *s == ExecutionStatus::Paused)
        .await
        .unwrap();

    engine.cancel(&run_id).unwrap();
    let run = handle.await.unwrap().unwrap();
    assert_eq!(run.status, ExecutionStatus::Cancelled);
    assert_eq!(run.step("b").unwrap().status, StepStatus::Pending);
}

#[tokio::test]
async fn test_control_of_unknown_run_is_an_error() {
    let engine = engine(ScriptedTools::new(), NoopOracle, EngineConfig::default());
    let id = uuid::Uuid::now_v7();
    assert!(matches!(engine.pause(&id), Err(EngineError::RunNotFound(_))));
    assert!(engine.status(&id).is_none());
}

// ---------------------------------------------------------------------------
// Resume, ad-hoc runs, shared templates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_resume_from_failed_step_skips_completed_steps() {
    let healthy = Arc::new(AtomicBool::new(false));
    let tools = {
        let healthy = healthy.clone();
        ScriptedTools::new()
            .returning("a", json!({"page_id": "p-1"}))
            .on("b", move |input| {
                if healthy.load(Ordering::SeqCst) {
                    Ok(ToolResponse::ok(json!({"seen": input["page_id"]})))
                } else {
                    Ok(ToolResponse::fail("service unavailable"))
                }
            })
    };
    let log = tools.call_log();
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let mut b = step("b", "b", json!({"page_id": "$step_1.page_id"})).depends_on("a");
    b.max_attempts = Some(1);
    let template = saved(&engine, "alice", vec![step("a", "a", json!({})), b]).await;

    let failed = engine.execute(&template.id, "alice", json!({})).await.unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    healthy.store(true, Ordering::SeqCst);
    log.lock().unwrap().clear();

    let resumed = engine.resume_from(&failed).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.resumed_from, Some(failed.id));
    assert_ne!(resumed.id, failed.id);
    assert_eq!(capabilities(&log), vec!["b"]);
    assert_eq!(resumed.output, Some(json!({"seen": "p-1"})));

    let err = engine.resume_from(&resumed).await.unwrap_err();
    assert!(matches!(err, EngineError::NotResumable { .. }));
}

#[tokio::test]
async fn test_adhoc_run_promoted_when_enabled() {
    let tools = ScriptedTools::new().returning("search", json!({"hits": 3}));
    let config = EngineConfig {
        auto_promote: true,
        ..EngineConfig::default()
    };
    let engine = engine(tools, NoopOracle, config);

    let run = engine
        .execute_adhoc(
            "alice",
            "quick search",
            vec![step("search", "search", json!({"q": "{{q}}"}))],
            json!({"q": "rust"}),
        )
        .await
        .unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);

    let templates = engine.manager().list("alice").await.unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].name, "quick search");
    assert_eq!(templates[0].origin, TemplateOrigin::AutoGenerated);
    assert_eq!(templates[0].stats.total_executions, 1);
    assert_eq!(templates[0].id, run.template_id);
}

#[tokio::test]
async fn test_adhoc_run_not_promoted_by_default() {
    let tools = ScriptedTools::new().returning("search", json!({}));
    let engine = engine(tools, NoopOracle, EngineConfig::default());

    let run = engine
        .execute_adhoc("alice", "quick search", vec![step("search", "search", json!({}))], json!({}))
        .await
        .unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);
    assert!(engine.manager().list("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shared_template_runs_for_any_owner() {
    let tools = ScriptedTools::new().returning("ping", json!({"pong": true}));
    let engine = engine(tools, NoopOracle, EngineConfig::default());
    let template = saved(&engine, SHARED_OWNER, vec![step("ping", "ping", json!({}))]).await;

    let run = engine.execute(&template.id, "bob", json!({})).await.unwrap();
    assert_eq!(run.status, ExecutionStatus::Completed);
    assert_eq!(run.owner, "bob");

    let stats = engine
        .manager()
        .load(&template.id, SHARED_OWNER)
        .await
        .unwrap()
        .stats;
    assert_eq!(stats.total_executions, 1);
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let tools = ScriptedTools::new().on("echo", |input| Ok(ToolResponse::ok(Value::Object(input.clone()))));
    let engine = engine(tools, NoopOracle, EngineConfig::default());
    let template = saved(&engine, "alice", vec![step("echo", "echo", json!({"n": "{{n}}"}))]).await;

    let mut handles = Vec::new();
    for n in 0..8 {
        let engine = engine.clone();
        let id = template.id.clone();
        handles.push(tokio::spawn(async move {
            engine.execute(&id, "alice", json!({"n": n})).await.unwrap()
        }));
    }
    for (n, handle) in handles.into_iter().enumerate() {
        let run = handle.await.unwrap();
        assert_eq!(run.output, Some(json!({"n": n})));
    }

    let stats = engine.manager().load(&template.id, "alice").await.unwrap().stats;
    assert_eq!(stats.total_executions, 8);
    assert_eq!(engine.history().len().await, 8);
}
