//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the stepwise
//! reasoning-action runtime. Defines the oracle and tool abstractions, the
//! tool registry, per-run state and the execution trace; every other crate
//! implements against these.

pub mod error;
pub mod event;
pub mod message;
pub mod oracle;
pub mod state;
pub mod tool;
pub mod trace;

// Re-export key types at crate root for ergonomics
pub use error::{Error, OracleError, RegistryError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role};
pub use oracle::{Oracle, OracleRequest, OracleResponse, Usage};
pub use state::{RunState, ScratchStore};
pub use tool::{
    FnTool, ParamSpec, ParamType, Tool, ToolContext, ToolDescriptor, ToolInput, ToolRegistry,
    ToolResult,
};
pub use trace::{CorrectionRecord, ExecutionTrace, StepRecord};
