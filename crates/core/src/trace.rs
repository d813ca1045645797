//! Execution trace — the append-only record of a run.
//!
//! Step indices are assigned here, never by callers, so they are always
//! contiguous from 1. Corrective re-prompts are kept on a separate list and
//! never count as steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolInput, ToolResult};

/// One completed reasoning cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position in the trace
    pub index: usize,
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_input: Option<ToolInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    /// Render in the same marker format the oracle is asked to produce.
    pub fn render(&self) -> String {
        let mut out = format!("Step {}:\nThought: {}\n", self.index, self.thought);
        if let Some(action) = &self.action {
            out.push_str(&format!("Action: {action}\n"));
        }
        if let Some(input) = &self.action_input {
            let json = serde_json::to_string(input).unwrap_or_else(|_| "{}".into());
            out.push_str(&format!("Action Input: {json}\n"));
        }
        if let Some(observation) = &self.observation {
            out.push_str(&format!("Observation: {observation}\n"));
        }
        out
    }
}

/// A reply that could not be parsed and triggered a corrective re-prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    /// Index the step would have had
    pub step_index: usize,
    pub raw_fragment: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered, append-only list of step records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTrace {
    steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    corrections: Vec<CorrectionRecord>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed action step and return it.
    pub fn append(
        &mut self,
        thought: impl Into<String>,
        action: impl Into<String>,
        action_input: ToolInput,
        tool_result: ToolResult,
        observation: impl Into<String>,
    ) -> &StepRecord {
        let record = StepRecord {
            index: self.steps.len() + 1,
            thought: thought.into(),
            action: Some(action.into()),
            action_input: Some(action_input),
            observation: Some(observation.into()),
            tool_result: Some(tool_result),
            timestamp: Utc::now(),
        };
        self.steps.push(record);
        &self.steps[self.steps.len() - 1]
    }

    /// Note an unparseable reply against the next step index.
    pub fn record_correction(&mut self, raw_fragment: impl Into<String>) {
        self.corrections.push(CorrectionRecord {
            step_index: self.steps.len() + 1,
            raw_fragment: raw_fragment.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn corrections(&self) -> &[CorrectionRecord] {
        &self.corrections
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.steps.last()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Full textual rendering, one block per step.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(StepRecord::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One-line digest: steps, successful tool calls, corrective retries.
    pub fn summary(&self) -> String {
        let successful = self
            .steps
            .iter()
            .filter(|s| s.tool_result.as_ref().is_some_and(ToolResult::is_success))
            .count();
        format!(
            "{} steps, {} successful tool calls, {} corrective retries",
            self.steps.len(),
            successful,
            self.corrections.len()
        )
    }
}
