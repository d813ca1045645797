//! The reasoning loop — Thought → Action → Observation, bounded.
//!
//! ```text
//!            ┌──────────── Continue ───────────┐
//!            ▼                                 │
//!  ──► Thinking ──► Acting ──► Observing ──────┘
//!        │  │                     │
//!        │  └─ Final ─► Finished  └─ max_steps ─► Finished (exhausted)
//!        └─ 2× ParseError / oracle failure ─► Failed
//! ```
//!
//! Every failure inside a step (unknown tool, invalid input, tool error,
//! tool panic, tool timeout) becomes a failing observation and the run
//! continues. Only oracle exhaustion and cancellation end a run early.
//! Whatever happens, the caller gets a [`RunResult`] with the full trace.

use futures::FutureExt;
use serde::{Serialize, Serializer};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stepwise_core::error::{Error, OracleError, ToolError};
use stepwise_core::event::{DomainEvent, EventBus};
use stepwise_core::message::Message;
use stepwise_core::oracle::{Oracle, OracleRequest, Usage};
use stepwise_core::state::RunState;
use stepwise_core::tool::{ToolContext, ToolInput, ToolRegistry, ToolResult};
use stepwise_core::trace::ExecutionTrace;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ContextBuilder;
use crate::observation::format_observation;
use crate::parser::{ParsedDecision, parse_response};
use crate::stream_event::LoopEvent;

/// Answer given when the step budget runs out.
pub const BUDGET_EXHAUSTED_ANSWER: &str =
    "I reached the maximum number of reasoning steps without finding a final answer.";

/// Answer given after two consecutive unparseable replies.
pub const UNPARSEABLE_ANSWER: &str = "Unable to determine next action.";

/// Answer given when the run is cancelled.
pub const CANCELLED_ANSWER: &str = "The run was cancelled before it completed.";

/// Stop sequence keeping the oracle from inventing observations.
const OBSERVATION_STOP: &str = "\nObservation:";

/// Limits and oracle parameters for a run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Maximum completed action steps.
    pub max_steps: usize,
    pub context_budget_tokens: usize,
    /// Deadline for each tool invocation.
    pub tool_timeout: Duration,
    /// Extra oracle attempts after a transient failure.
    pub oracle_retries: u32,
    /// Base retry delay, doubled per attempt.
    pub oracle_backoff: Duration,
    /// Deadline for each oracle attempt.
    pub oracle_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".into(),
            temperature: 0.1,
            max_tokens: Some(1000),
            max_steps: 10,
            context_budget_tokens: 6000,
            tool_timeout: Duration::from_secs(30),
            oracle_retries: 2,
            oracle_backoff: Duration::from_millis(500),
            oracle_timeout: Duration::from_secs(60),
        }
    }
}

/// Why a run failed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// Two consecutive replies could not be parsed.
    Unparseable { raw_fragment: String },

    /// The oracle could not be reached after all retries.
    Oracle {
        #[serde(serialize_with = "serialize_display")]
        error: OracleError,
    },
}

fn serialize_display<S: Serializer>(error: &OracleError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The oracle gave a final answer.
    Answered,
    /// `max_steps` action steps were taken without a final answer.
    BudgetExhausted,
    Failed { failure: RunFailure },
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Self::Answered)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// The final answer, or the canned text for non-answered outcomes.
    pub answer: String,
    pub trace: ExecutionTrace,
    pub state: RunState,
    /// Oracle attempts, including retries and corrective re-prompts.
    pub oracle_calls: u32,
    /// Corrective re-prompts issued.
    pub parse_retries: u32,
    /// Summed token usage, when the oracle reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub duration_ms: u64,
}

/// A run executing on its own task.
///
/// `events` yields [`LoopEvent`]s until the run finishes, then closes.
/// It can be consumed once. The channel is unbounded so a run never waits
/// on its reader: awaiting the result before draining the events is fine.
/// A run emits a handful of events per step, so `max_steps` bounds the
/// backlog.
pub struct RunHandle {
    pub events: mpsc::UnboundedReceiver<LoopEvent>,
    result: JoinHandle<RunResult>,
}

impl RunHandle {
    /// Split into an event stream and the result handle.
    pub fn into_stream(self) -> (UnboundedReceiverStream<LoopEvent>, JoinHandle<RunResult>) {
        (UnboundedReceiverStream::new(self.events), self.result)
    }

    /// Wait for the result, discarding any unread events.
    pub async fn join(self) -> Result<RunResult, Error> {
        drop(self.events);
        self.result
            .await
            .map_err(|e| Error::Internal(format!("run task failed: {e}")))
    }
}

/// Mutable bookkeeping for one run. Never shared between runs.
struct Run {
    state: RunState,
    trace: ExecutionTrace,
    oracle_calls: u32,
    parse_retries: u32,
    usage: Option<Usage>,
    events: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl Run {
    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.events {
            // a dropped receiver just means nobody is watching
            let _ = tx.send(event);
        }
    }
}

/// The bounded reasoning-action loop.
///
/// Cheap to clone; the registry and oracle are shared, while every run
/// gets fresh state.
#[derive(Clone)]
pub struct ReasoningLoop {
    oracle: Arc<dyn Oracle>,
    tools: Arc<ToolRegistry>,
    config: LoopConfig,
    context: ContextBuilder,
    event_bus: Option<Arc<EventBus>>,
}

impl ReasoningLoop {
    pub fn new(oracle: Arc<dyn Oracle>, tools: Arc<ToolRegistry>, config: LoopConfig) -> Self {
        let context = ContextBuilder::new(config.context_budget_tokens);
        Self {
            oracle,
            tools,
            config,
            context,
            event_bus: None,
        }
    }

    /// Publish domain events to a shared bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Replace the system instructions (see [`ContextBuilder::with_instructions`]).
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.context = self.context.with_instructions(instructions);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Answer `query`, running to a terminal outcome.
    pub async fn run(&self, query: impl Into<String>) -> RunResult {
        self.execute(query.into(), CancellationToken::new(), None)
            .await
    }

    /// Like [`run`](Self::run), stopping at the next step boundary once
    /// `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        query: impl Into<String>,
        cancel: CancellationToken,
    ) -> RunResult {
        self.execute(query.into(), cancel, None).await
    }

    /// Run on a new task, streaming step events as they happen.
    pub fn spawn(&self, query: impl Into<String>, cancel: CancellationToken) -> RunHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        let query = query.into();
        let result = tokio::spawn(async move { this.execute(query, cancel, Some(tx)).await });
        RunHandle { events: rx, result }
    }

    async fn execute(
        &self,
        query: String,
        cancel: CancellationToken,
        events: Option<mpsc::UnboundedSender<LoopEvent>>,
    ) -> RunResult {
        let started = Instant::now();
        let mut run = Run {
            state: RunState::new(query),
            trace: ExecutionTrace::new(),
            oracle_calls: 0,
            parse_retries: 0,
            usage: None,
            events,
        };
        let run_id = run.state.id.clone();

        info!(
            run_id = %run_id,
            model = %self.config.model,
            max_steps = self.config.max_steps,
            tools = self.tools.len(),
            "Run starting"
        );
        run.emit(LoopEvent::RunStarted {
            run_id: run_id.clone(),
            query: run.state.query().to_string(),
            max_steps: self.config.max_steps,
        });

        let (outcome, answer) = self.drive(&mut run, &cancel).await;
        run.state.finish(answer.clone());

        match &outcome {
            RunOutcome::Failed { failure } => warn!(
                run_id = %run_id,
                steps = run.trace.len(),
                failure = ?failure,
                "Run failed"
            ),
            _ => info!(
                run_id = %run_id,
                outcome = outcome.as_str(),
                steps = run.trace.len(),
                oracle_calls = run.oracle_calls,
                parse_retries = run.parse_retries,
                "Run finished"
            ),
        }

        run.emit(LoopEvent::Finished {
            run_id: run_id.clone(),
            outcome: outcome.as_str().to_string(),
            answer: answer.clone(),
            steps: run.trace.len(),
            usage: run.usage,
        });
        self.publish(DomainEvent::RunFinished {
            run_id,
            outcome: outcome.as_str().to_string(),
            steps: run.trace.len(),
            timestamp: chrono::Utc::now(),
        });

        RunResult {
            outcome,
            answer,
            trace: run.trace,
            state: run.state,
            oracle_calls: run.oracle_calls,
            parse_retries: run.parse_retries,
            usage: run.usage,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// The state machine proper. Returns the outcome and the answer text.
    async fn drive(&self, run: &mut Run, cancel: &CancellationToken) -> (RunOutcome, String) {
        loop {
            if run.trace.len() >= self.config.max_steps {
                warn!(max_steps = self.config.max_steps, "Step budget exhausted");
                return (
                    RunOutcome::BudgetExhausted,
                    BUDGET_EXHAUSTED_ANSWER.to_string(),
                );
            }
            let step = run.trace.len() + 1;

            // ── Thinking ──
            let mut rejected: Option<String> = None;
            let (thought, action_name, action_input) = loop {
                if cancel.is_cancelled() {
                    info!(step, "Run cancelled");
                    return (RunOutcome::Cancelled, CANCELLED_ANSWER.to_string());
                }
                let attempt = if rejected.is_some() { 2 } else { 1 };
                run.emit(LoopEvent::Thinking { step, attempt });

                let built = self.context.build(
                    &run.state,
                    &run.trace,
                    self.tools.schemas(),
                    rejected.as_deref(),
                );
                debug!(
                    step,
                    attempt,
                    tokens = built.metadata.total_tokens,
                    steps_dropped = built.metadata.steps_dropped,
                    "Context built"
                );

                let reply = match self.call_oracle(run, built.messages).await {
                    Ok(reply) => reply,
                    Err(error) => {
                        let answer = format!("The reasoning service could not be reached: {error}");
                        return (
                            RunOutcome::Failed {
                                failure: RunFailure::Oracle { error },
                            },
                            answer,
                        );
                    }
                };
                run.state.push_message(Message::assistant(&reply));

                match parse_response(&reply) {
                    ParsedDecision::Final { answer } => {
                        info!(step, "Final answer received");
                        return (RunOutcome::Answered, answer);
                    }
                    ParsedDecision::Continue {
                        thought,
                        action_name,
                        action_input,
                    } => break (thought, action_name, action_input),
                    ParsedDecision::ParseError { raw_fragment } => {
                        if rejected.is_some() {
                            warn!(step, "Second consecutive unparseable reply");
                            return (
                                RunOutcome::Failed {
                                    failure: RunFailure::Unparseable { raw_fragment },
                                },
                                UNPARSEABLE_ANSWER.to_string(),
                            );
                        }
                        warn!(step, fragment = %raw_fragment, "Unparseable reply, re-prompting once");
                        run.trace.record_correction(raw_fragment.clone());
                        run.parse_retries += 1;
                        run.emit(LoopEvent::ParseRetry { step, raw_fragment });
                        rejected = Some(reply);
                    }
                }
            };

            // ── Acting ──
            debug!(step, tool = %action_name, "Dispatching tool");
            run.emit(LoopEvent::ToolCall {
                step,
                tool: action_name.clone(),
                input: action_input.clone(),
            });
            let started = Instant::now();
            let mut result = self
                .dispatch(step, &action_name, &action_input, &mut run.state)
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;
            result.insert_metadata("duration_ms", duration_ms);

            // ── Observing ──
            let observation = format_observation(&result);
            run.state.push_message(Message::tool(&observation));
            run.emit(LoopEvent::Observation {
                step,
                tool: action_name.clone(),
                success: result.is_success(),
                observation: observation.clone(),
                duration_ms,
            });
            self.publish(DomainEvent::ToolExecuted {
                run_id: run.state.id.clone(),
                tool_name: action_name.clone(),
                success: result.is_success(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
            run.trace
                .append(thought, action_name, action_input, result, observation);
        }
    }

    /// Invoke the oracle with bounded retries on transient failures.
    async fn call_oracle(
        &self,
        run: &mut Run,
        messages: Vec<Message>,
    ) -> Result<String, OracleError> {
        let request = OracleRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stop: vec![OBSERVATION_STOP.to_string()],
        };

        let mut attempt: u32 = 0;
        loop {
            run.oracle_calls += 1;
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.config.oracle_timeout,
                self.oracle.complete(request.clone()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(OracleError::Timeout(format!(
                    "{} gave no reply within {}ms",
                    self.oracle.name(),
                    self.config.oracle_timeout.as_millis()
                ))),
            };
            let duration_ms = started.elapsed().as_millis() as u64;
            self.publish(DomainEvent::OracleInvoked {
                run_id: run.state.id.clone(),
                model: self.config.model.clone(),
                attempt: attempt + 1,
                success: outcome.is_ok(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });

            match outcome {
                Ok(response) => {
                    if let Some(usage) = &response.usage {
                        run.usage.get_or_insert_default().add(usage);
                    }
                    debug!(oracle = self.oracle.name(), duration_ms, "Oracle replied");
                    return Ok(response.text);
                }
                Err(e) if e.is_transient() && attempt < self.config.oracle_retries => {
                    let delay = self
                        .config
                        .oracle_backoff
                        .saturating_mul(1u32 << attempt.min(16));
                    warn!(
                        oracle = self.oracle.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient oracle failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        oracle = self.oracle.name(),
                        attempts = attempt + 1,
                        error = %e,
                        "Oracle failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Look up, validate and invoke a tool. Never fails: every problem
    /// becomes a failing `ToolResult`.
    async fn dispatch(
        &self,
        step: usize,
        name: &str,
        input: &ToolInput,
        state: &mut RunState,
    ) -> ToolResult {
        match self.invoke_tool(step, name, input, state).await {
            Ok(result) => result,
            Err(e) => {
                warn!(step, tool = name, kind = e.kind(), error = %e, "Tool call failed");
                ToolResult::from(e)
            }
        }
    }

    async fn invoke_tool(
        &self,
        step: usize,
        name: &str,
        input: &ToolInput,
        state: &mut RunState,
    ) -> Result<ToolResult, ToolError> {
        let (descriptor, tool) = self.tools.lookup(name)?;
        let validated = descriptor.validate(input)?;

        let timed_out = || ToolError::Timeout {
            tool_name: name.to_string(),
            timeout_ms: self.config.tool_timeout.as_millis() as u64,
        };
        let started = Instant::now();
        let mut ctx = ToolContext::new(step, &mut state.scratch);
        let call = AssertUnwindSafe(tool.invoke(validated, &mut ctx)).catch_unwind();
        match tokio::time::timeout(self.config.tool_timeout, call).await {
            // a tool that blocks inside poll can only be caught afterwards
            Ok(Ok(_)) if started.elapsed() > self.config.tool_timeout => {
                warn!(step, tool = name, "Tool returned after its deadline");
                Err(timed_out())
            }
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ToolError::Panicked {
                tool_name: name.to_string(),
                message: panic_message(panic.as_ref()),
            }),
            Err(_) => Err(timed_out()),
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
