//! End-to-end integration tests for the Stepwise reasoning loop.
//!
//! These drive the full pipeline (context building, parsing, validation,
//! tool execution, observation) with a scripted oracle and the real
//! built-in tool registry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use stepwise_agent::{
    CancellationToken, LoopConfig, LoopEvent, ReasoningLoop, RunFailure, RunOutcome,
};
use stepwise_core::error::{OracleError, ToolError};
use stepwise_core::oracle::{Oracle, OracleRequest, OracleResponse, Usage};
use stepwise_core::tool::{
    ParamSpec, ParamType, Tool, ToolContext, ToolDescriptor, ToolInput, ToolRegistry, ToolResult,
};
use stepwise_tools::default_registry;
use tokio_stream::StreamExt;

// ── Scripted Oracle ──────────────────────────────────────────────────────

/// An oracle that returns scripted replies in sequence.
struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, OracleError>>>,
    repeat: Option<String>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing(errors: Vec<OracleError>) -> Self {
        Self {
            replies: Mutex::new(errors.into_iter().map(Err).collect()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn always(reply: String) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            repeat: Some(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> OracleRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait::async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn complete(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let next = self.replies.lock().unwrap().pop_front();
        let text = match (next, &self.repeat) {
            (Some(reply), _) => reply?,
            (None, Some(reply)) => reply.clone(),
            (None, None) => panic!("ScriptedOracle exhausted at call #{call}"),
        };
        Ok(OracleResponse {
            text,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock".into(),
        })
    }
}

fn action(thought: &str, tool: &str, input: serde_json::Value) -> String {
    format!("Thought: {thought}\nAction: {tool}\nAction Input: {input}")
}

fn final_answer(answer: &str) -> String {
    format!("Thought: I know the answer now.\nFinal Answer: {answer}")
}

fn config(max_steps: usize) -> LoopConfig {
    LoopConfig {
        max_steps,
        tool_timeout: Duration::from_millis(200),
        oracle_backoff: Duration::from_millis(1),
        ..LoopConfig::default()
    }
}

fn agent(oracle: Arc<ScriptedOracle>, max_steps: usize) -> ReasoningLoop {
    let tools = Arc::new(default_registry().unwrap());
    ReasoningLoop::new(oracle, tools, config(max_steps))
}

// ── Scenario A: one tool step, then the answer ──────────────────────────

#[tokio::test]
async fn e2e_calculator_then_final_answer() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        action("need arithmetic", "calculator", json!({"expression": "2+2"})),
        final_answer("4"),
    ]));
    let result = agent(oracle.clone(), 10).run("What is 2+2?").await;

    assert!(matches!(result.outcome, RunOutcome::Answered));
    assert_eq!(result.answer, "4");
    assert_eq!(result.trace.len(), 1);
    let step = &result.trace.steps()[0];
    assert_eq!(step.action.as_deref(), Some("calculator"));
    assert!(step.observation.as_deref().unwrap().contains("result: 4"));
    assert_eq!(oracle.calls(), 2);
    assert_eq!(result.usage.unwrap().total_tokens, 30);
}

#[tokio::test]
async fn e2e_final_answer_on_first_reply() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        "Thought: trivial.\nFinal Answer: Paris is the capital of France.".into(),
    ]));
    let result = agent(oracle, 10).run("Capital of France?").await;

    assert_eq!(result.answer, "Paris is the capital of France.");
    assert!(result.trace.is_empty());
    assert!(result.state.is_complete());
}

#[tokio::test]
async fn e2e_tool_catalogue_in_system_prompt() {
    let oracle = Arc::new(ScriptedOracle::new(vec![final_answer("ok")]));
    agent(oracle.clone(), 10).run("q").await;

    let system = &oracle.last_request().messages[0].content;
    for name in [
        "calculator",
        "current_time",
        "web_search",
        "get_weather",
        "text_analyzer",
        "memory_store",
    ] {
        assert!(system.contains(&format!("- {name}:")), "missing {name}");
    }
}

// ── Scenario B: one corrective retry ─────────────────────────────────────

#[tokio::test]
async fn e2e_corrective_retry_recovers() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        "The answer is obviously four.".into(),
        final_answer("4"),
    ]));
    let result = agent(oracle.clone(), 10).run("What is 2+2?").await;

    assert!(matches!(result.outcome, RunOutcome::Answered));
    assert_eq!(result.answer, "4");
    assert_eq!(result.trace.len(), 0);
    assert_eq!(result.parse_retries, 1);
    assert_eq!(result.trace.corrections().len(), 1);

    let retry = oracle.last_request();
    assert!(retry.messages.last().unwrap().content.contains("did not follow the required format"));
}

#[tokio::test]
async fn e2e_second_parse_error_fails() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        "no idea".into(),
        "still no idea".into(),
    ]));
    let result = agent(oracle.clone(), 10).run("q").await;

    assert!(matches!(
        result.outcome,
        RunOutcome::Failed {
            failure: RunFailure::Unparseable { .. }
        }
    ));
    assert_eq!(result.answer, "Unable to determine next action.");
    assert_eq!(oracle.calls(), 2);
}

// ── Scenario C: budget exhaustion ────────────────────────────────────────

#[tokio::test]
async fn e2e_step_budget_is_hard_limit() {
    for max_steps in [1, 3, 7] {
        let oracle = Arc::new(ScriptedOracle::always(action(
            "keep computing",
            "calculator",
            json!({"expression": "1+1"}),
        )));
        let result = agent(oracle.clone(), max_steps).run("loop").await;

        assert!(matches!(result.outcome, RunOutcome::BudgetExhausted));
        assert_eq!(result.trace.len(), max_steps);
        assert_eq!(oracle.calls(), max_steps);
        assert!(result.answer.contains("maximum number of reasoning steps"));
        assert_eq!(result.state.final_answer(), Some(result.answer.as_str()));
    }
}

// ── Scenario D: a tool that fails internally ─────────────────────────────

struct BrokenTool;

#[async_trait::async_trait]
impl Tool for BrokenTool {
    async fn invoke(
        &self,
        _input: ToolInput,
        _ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        panic!("disk on fire")
    }
}

#[tokio::test]
async fn e2e_panicking_tool_becomes_observation() {
    let mut registry = default_registry().unwrap();
    registry
        .register(
            ToolDescriptor::new("broken", "Always breaks").param(ParamSpec::optional(
                "arg",
                ParamType::Any,
                "Ignored",
            )),
            Arc::new(BrokenTool),
        )
        .unwrap();
    let oracle = Arc::new(ScriptedOracle::new(vec![
        action("try it", "broken", json!({})),
        action("fallback", "calculator", json!({"expression": "6*7"})),
        final_answer("42"),
    ]));
    let result = ReasoningLoop::new(oracle, Arc::new(registry), config(10))
        .run("q")
        .await;

    assert_eq!(result.answer, "42");
    assert_eq!(result.trace.len(), 2);
    let broken = result.trace.steps()[0].tool_result.as_ref().unwrap();
    assert!(!broken.is_success());
    assert!(broken.error().unwrap().contains("disk on fire"));
    assert!(result.trace.steps()[1].observation.as_deref().unwrap().contains("42"));
}

#[tokio::test]
async fn e2e_calculator_error_is_observed() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        action("divide", "calculator", json!({"expression": "1/0"})),
        final_answer("undefined"),
    ]));
    let result = agent(oracle, 10).run("1/0?").await;

    let observation = result.trace.steps()[0].observation.as_deref().unwrap();
    assert!(observation.starts_with("Tool failed:"));
    assert_eq!(result.answer, "undefined");
}

// ── Dispatch edge cases ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_unknown_tool_continues() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        action("look it up", "encyclopedia", json!({"topic": "rust"})),
        final_answer("done"),
    ]));
    let result = agent(oracle, 10).run("q").await;

    assert_eq!(result.trace.len(), 1);
    assert!(result.trace.steps()[0]
        .observation
        .as_deref()
        .unwrap()
        .contains("unknown tool"));
    assert!(matches!(result.outcome, RunOutcome::Answered));
}

#[tokio::test]
async fn e2e_invalid_enum_value_rejected_before_tool() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        action(
            "analyze",
            "text_analyzer",
            json!({"text": "hello", "analysis_type": "poetry"}),
        ),
        final_answer("n/a"),
    ]));
    let result = agent(oracle, 10).run("q").await;

    let tool_result = result.trace.steps()[0].tool_result.as_ref().unwrap();
    assert_eq!(tool_result.metadata()["error_kind"], "invalid_arguments");
}

#[tokio::test]
async fn e2e_memory_store_round_trip_within_run() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        action(
            "remember",
            "memory_store",
            json!({"key": "population", "value": 21540000}),
        ),
        action(
            "recall",
            "memory_store",
            json!({"key": "population", "operation": "get"}),
        ),
        final_answer("21540000"),
    ]));
    let result = agent(oracle, 10).run("q").await;

    assert!(result.trace.steps()[1]
        .observation
        .as_deref()
        .unwrap()
        .contains("value: 21540000"));
    assert_eq!(result.state.scratch.get("population"), Some(&json!(21540000)));
}

// ── Isolation, cancellation, streaming ───────────────────────────────────

#[tokio::test]
async fn e2e_concurrent_runs_do_not_share_scratch() {
    let tools: Arc<ToolRegistry> = Arc::new(default_registry().unwrap());
    let mut handles = Vec::new();
    for i in 0..4 {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            action(
                "store",
                "memory_store",
                json!({"key": "owner", "value": i}),
            ),
            final_answer(&i.to_string()),
        ]));
        let agent = ReasoningLoop::new(oracle, tools.clone(), config(5));
        handles.push(tokio::spawn(async move { agent.run(format!("run {i}")).await }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap();
        assert_eq!(result.answer, i.to_string());
        assert_eq!(result.state.scratch.len(), 1);
        assert_eq!(result.state.scratch.get("owner"), Some(&json!(i)));
    }
}

#[tokio::test]
async fn e2e_cancellation_is_distinct_outcome() {
    let oracle = Arc::new(ScriptedOracle::always(action(
        "again",
        "calculator",
        json!({"expression": "1+1"}),
    )));
    let cancel = CancellationToken::new();
    let handle = agent(oracle, 1000).spawn("q", cancel.clone());
    let (mut events, result) = handle.into_stream();

    // cancel once the first observation arrives
    while let Some(event) = events.next().await {
        if matches!(event, LoopEvent::Observation { .. }) {
            cancel.cancel();
        }
    }
    let result = result.await.unwrap();

    assert!(matches!(result.outcome, RunOutcome::Cancelled));
    assert!(result.trace.len() < 1000);
    assert!(result.state.is_complete());
}

#[tokio::test]
async fn e2e_event_stream_is_finite_and_ordered() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        "gibberish".into(),
        action("weather", "get_weather", json!({"city": "Tokyo"})),
        final_answer("Mild."),
    ]));
    let (events, result) = agent(oracle, 10)
        .spawn("Weather in Tokyo?", CancellationToken::new())
        .into_stream();
    let events: Vec<LoopEvent> = events.collect().await;
    let result = result.await.unwrap();

    let kinds: Vec<_> = events.iter().map(LoopEvent::event_type).collect();
    assert_eq!(
        kinds,
        vec![
            "run_started",
            "thinking",
            "parse_retry",
            "thinking",
            "tool_call",
            "observation",
            "thinking",
            "finished",
        ]
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(result.answer, "Mild.");
}

#[tokio::test]
async fn e2e_oracle_outage_surfaces_as_failure() {
    let oracle = Arc::new(ScriptedOracle::failing(vec![
        OracleError::Network("down".into()),
        OracleError::Network("down".into()),
        OracleError::Network("down".into()),
    ]));
    let result = agent(oracle.clone(), 10).run("q").await;

    assert!(matches!(
        result.outcome,
        RunOutcome::Failed {
            failure: RunFailure::Oracle { .. }
        }
    ));
    assert_eq!(oracle.calls(), 3);
    assert!(result.state.is_complete());
}

#[tokio::test]
async fn e2e_result_serializes_to_json() {
    let oracle = Arc::new(ScriptedOracle::new(vec![
        action("math", "calculator", json!({"expression": "3*3"})),
        final_answer("9"),
    ]));
    let result = agent(oracle, 10).run("3*3?").await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["outcome"]["status"], "answered");
    assert_eq!(json["answer"], "9");
    assert_eq!(json["trace"]["steps"][0]["action"], "calculator");
    assert_eq!(json["oracle_calls"], 2);
}
