//! Step events emitted while a run is in progress.
//!
//! A spawned run sends these over an unbounded channel in the order they
//! happen. The sequence is finite: `finished` is always the last event,
//! after which the channel closes.

use serde::{Deserialize, Serialize};
use stepwise_core::oracle::Usage;
use stepwise_core::tool::ToolInput;

/// Events emitted by the reasoning loop.
///
/// - `run_started` — the run was accepted
/// - `thinking`    — the oracle is about to be consulted for a step
/// - `parse_retry` — a reply was unparseable; one corrective re-prompt follows
/// - `tool_call`   — a tool is being dispatched
/// - `observation` — the tool finished (successfully or not)
/// - `finished`    — terminal outcome reached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    RunStarted {
        run_id: String,
        query: String,
        max_steps: usize,
    },

    Thinking {
        step: usize,
        /// 1 for the first attempt, 2 for the corrective re-prompt
        attempt: u32,
    },

    ParseRetry { step: usize, raw_fragment: String },

    ToolCall {
        step: usize,
        tool: String,
        input: ToolInput,
    },

    Observation {
        step: usize,
        tool: String,
        success: bool,
        observation: String,
        duration_ms: u64,
    },

    Finished {
        run_id: String,
        outcome: String,
        answer: String,
        steps: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl LoopEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::Thinking { .. } => "thinking",
            Self::ParseRetry { .. } => "parse_retry",
            Self::ToolCall { .. } => "tool_call",
            Self::Observation { .. } => "observation",
            Self::Finished { .. } => "finished",
        }
    }

    /// Whether this is the last event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}
