//! Oracle context assembly.
//!
//! | Part | Source | Trim Strategy |
//! |------|--------|---------------|
//! | System | Instructions + tool catalogue | Never trimmed |
//! | Question | Run state | Never trimmed |
//! | Prior steps | Execution trace | Oldest dropped first |
//! | Correction | Rejected reply + reminder | Never trimmed |

pub mod builder;
pub mod token;

pub use builder::{BuiltContext, CORRECTION_REMINDER, ContextBuilder, ContextMetadata, DEFAULT_INSTRUCTIONS};
