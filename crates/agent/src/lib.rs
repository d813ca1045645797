//! The reasoning loop — the heart of Stepwise.
//!
//! A run follows a **Thought → Action → Observation** cycle:
//!
//! 1. **Build context** (instructions + tool catalogue + question + prior steps)
//! 2. **Consult the oracle** and parse its reply
//! 3. **If an action**: validate and invoke the tool, record the observation, loop
//! 4. **If a final answer**: finish the run
//!
//! The loop stops on a final answer, when the step budget runs out, when
//! the oracle cannot be reached, or when the caller cancels.

pub mod context;
pub mod loop_runner;
pub mod observation;
pub mod parser;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{BuiltContext, ContextBuilder, ContextMetadata};
pub use loop_runner::{LoopConfig, ReasoningLoop, RunFailure, RunHandle, RunOutcome, RunResult};
pub use observation::format_observation;
pub use parser::{ParsedDecision, parse_response};
pub use stream_event::LoopEvent;
pub use tokio_util::sync::CancellationToken;
