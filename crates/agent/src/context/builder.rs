//! Context builder — assembles the next oracle request.
//!
//! Two messages, always: a system message holding the fixed protocol
//! instructions and the tool catalogue, and a user message holding the
//! question plus every prior step. When a corrective re-prompt is needed
//! the rejected reply and a format reminder are appended.
//!
//! # Budget
//!
//! If the estimate exceeds the token budget, the oldest steps are dropped
//! one at a time (most recent kept) until it fits. Given the same trace
//! and budget the result is always identical.

use serde::{Deserialize, Serialize};
use stepwise_core::message::Message;
use stepwise_core::state::RunState;
use stepwise_core::tool::ToolDescriptor;
use stepwise_core::trace::ExecutionTrace;
use tracing::{debug, warn};

use crate::context::token;

/// Default instructions describing the reply protocol.
pub const DEFAULT_INSTRUCTIONS: &str = "\
You answer questions by reasoning step by step and calling tools when you need \
information or computation you cannot do reliably yourself.

Available tools:
{tools}
Reply in exactly this format:
Thought: your reasoning about what to do next
Action: the name of one tool from the list above
Action Input: a JSON object with the tool's parameters

You will then receive an Observation with the tool's result. Never write an \
Observation yourself. When you know the answer, reply with:
Thought: your final reasoning
Final Answer: the complete answer to the question";

/// Sent after a reply that could not be parsed.
pub const CORRECTION_REMINDER: &str = "\
Your previous reply did not follow the required format and could not be understood. \
Reply again using exactly:
Thought: ...
Action: <tool name>
Action Input: <JSON object>
or, if you know the answer:
Thought: ...
Final Answer: <answer>";

/// Output of one build: the messages plus how they were budgeted.
#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub messages: Vec<Message>,
    pub metadata: ContextMetadata,
}

/// How the budget was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Estimated tokens of the final messages.
    pub total_tokens: usize,
    /// Configured token budget.
    pub budget: usize,
    pub steps_included: usize,
    pub steps_dropped: usize,
    /// True when even zero steps did not fit.
    pub over_budget: bool,
}

/// Builds oracle requests. Stateless; clone and reuse freely.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    instructions: String,
    budget_tokens: usize,
}

impl ContextBuilder {
    pub fn new(budget_tokens: usize) -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            budget_tokens,
        }
    }

    /// Replace the system instructions. `{tools}` is substituted with the
    /// rendered tool catalogue.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn budget_tokens(&self) -> usize {
        self.budget_tokens
    }

    /// Build the messages for the next oracle call.
    ///
    /// `rejected_reply` is the previous, unparseable reply when this is a
    /// corrective re-prompt.
    pub fn build(
        &self,
        state: &RunState,
        trace: &ExecutionTrace,
        tools: &[ToolDescriptor],
        rejected_reply: Option<&str>,
    ) -> BuiltContext {
        let system = Message::system(self.system_prompt(tools));
        let rendered: Vec<String> = trace.steps().iter().map(|s| s.render()).collect();

        let mut dropped = 0;
        loop {
            let mut messages = vec![
                system.clone(),
                Message::user(user_prompt(state.query(), &rendered[dropped..], dropped)),
            ];
            if let Some(reply) = rejected_reply {
                messages.push(Message::assistant(reply));
                messages.push(Message::user(CORRECTION_REMINDER));
            }

            let total_tokens = token::estimate_messages_tokens(&messages);
            let fits = total_tokens <= self.budget_tokens;
            if fits || dropped == rendered.len() {
                if !fits {
                    warn!(
                        total_tokens,
                        budget = self.budget_tokens,
                        "Context exceeds budget even without prior steps"
                    );
                } else if dropped > 0 {
                    debug!(dropped, kept = rendered.len() - dropped, "Dropped oldest steps to fit budget");
                }
                return BuiltContext {
                    messages,
                    metadata: ContextMetadata {
                        total_tokens,
                        budget: self.budget_tokens,
                        steps_included: rendered.len() - dropped,
                        steps_dropped: dropped,
                        over_budget: !fits,
                    },
                };
            }
            dropped += 1;
        }
    }

    fn system_prompt(&self, tools: &[ToolDescriptor]) -> String {
        let catalogue: String = tools.iter().map(ToolDescriptor::render).collect();
        if self.instructions.contains("{tools}") {
            self.instructions.replace("{tools}", &catalogue)
        } else {
            format!("{}\n\nAvailable tools:\n{}", self.instructions, catalogue)
        }
    }
}

fn user_prompt(query: &str, steps: &[String], omitted: usize) -> String {
    let mut out = format!("Question: {query}\n");
    if omitted > 0 {
        out.push_str(&format!(
            "\n({omitted} earlier step(s) omitted to fit the context budget)\n"
        ));
    }
    if steps.is_empty() && omitted == 0 {
        out.push_str("\nBegin.");
    } else {
        out.push_str("\nPrevious steps:\n");
        out.push_str(&steps.join("\n"));
        out.push_str("\nContinue with your next Thought.");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_core::message::Role;
    use stepwise_core::tool::{ParamSpec, ParamType, ToolInput, ToolResult};

    fn tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("compute", "Evaluate arithmetic").param(ParamSpec::required(
                "expr",
                ParamType::String,
                "Expression",
            )),
        ]
    }

    fn trace_with(n: usize, observation_len: usize) -> ExecutionTrace {
        let mut trace = ExecutionTrace::new();
        for i in 0..n {
            let input: ToolInput = json!({"expr": format!("{i}+{i}")})
                .as_object()
                .cloned()
                .unwrap();
            trace.append(
                format!("thought {}", i + 1),
                "compute",
                input,
                ToolResult::ok(i * 2),
                "o".repeat(observation_len),
            );
        }
        trace
    }

    #[test]
    fn first_request_has_system_and_question() {
        let state = RunState::new("What is 2+2?");
        let built = ContextBuilder::new(6000).build(&state, &ExecutionTrace::new(), &tools(), None);
        assert_eq!(built.messages.len(), 2);
        assert_eq!(built.messages[0].role, Role::System);
        assert!(built.messages[0].content.contains("- compute: Evaluate arithmetic"));
        assert!(built.messages[0].content.contains("Final Answer:"));
        assert!(built.messages[1].content.starts_with("Question: What is 2+2?"));
        assert_eq!(built.metadata.steps_included, 0);
    }

    #[test]
    fn steps_are_rendered_in_order() {
        let state = RunState::new("q");
        let built = ContextBuilder::new(6000).build(&state, &trace_with(2, 5), &tools(), None);
        let user = &built.messages[1].content;
        let first = user.find("Step 1:").unwrap();
        let second = user.find("Step 2:").unwrap();
        assert!(first < second);
        assert_eq!(built.metadata.steps_included, 2);
        assert!(!built.metadata.over_budget);
    }

    #[test]
    fn oldest_steps_dropped_first() {
        let state = RunState::new("q");
        let trace = trace_with(5, 400);
        let unlimited = ContextBuilder::new(100_000).build(&state, &trace, &tools(), None);
        let budget = unlimited.metadata.total_tokens - 150;

        let built = ContextBuilder::new(budget).build(&state, &trace, &tools(), None);
        assert!(built.metadata.steps_dropped >= 1);
        assert!(built.metadata.total_tokens <= budget);
        let user = &built.messages[1].content;
        assert!(!user.contains("thought 1\n"));
        assert!(user.contains("thought 5"));
        assert!(user.contains("earlier step(s) omitted"));
    }

    #[test]
    fn truncation_is_deterministic() {
        let state = RunState::new("q");
        let trace = trace_with(6, 300);
        let builder = ContextBuilder::new(700);
        let a = builder.build(&state, &trace, &tools(), None);
        let b = builder.build(&state, &trace, &tools(), None);
        assert_eq!(a.metadata, b.metadata);
        assert_eq!(a.messages[1].content, b.messages[1].content);
    }

    #[test]
    fn over_budget_sends_zero_steps() {
        let state = RunState::new("q");
        let built = ContextBuilder::new(10).build(&state, &trace_with(3, 10), &tools(), None);
        assert!(built.metadata.over_budget);
        assert_eq!(built.metadata.steps_included, 0);
        assert_eq!(built.metadata.steps_dropped, 3);
    }

    #[test]
    fn correction_appends_reply_and_reminder() {
        let state = RunState::new("q");
        let built = ContextBuilder::new(6000).build(
            &state,
            &ExecutionTrace::new(),
            &tools(),
            Some("I dunno"),
        );
        assert_eq!(built.messages.len(), 4);
        assert_eq!(built.messages[2].role, Role::Assistant);
        assert_eq!(built.messages[2].content, "I dunno");
        assert_eq!(built.messages[3].content, CORRECTION_REMINDER);
    }

    #[test]
    fn custom_instructions_without_placeholder_get_catalogue() {
        let state = RunState::new("q");
        let built = ContextBuilder::new(6000)
            .with_instructions("Be brief.")
            .build(&state, &ExecutionTrace::new(), &tools(), None);
        assert!(built.messages[0].content.starts_with("Be brief."));
        assert!(built.messages[0].content.contains("- compute"));
    }
}
