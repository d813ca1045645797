//! Mutable per-run state.
//!
//! Each run owns exactly one [`RunState`]; nothing in it is shared with
//! other runs. The scratch store lives here too, so values a tool stores
//! during one run are invisible to any other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::message::{Message, Role};

/// Run-scoped key/value scratch space exposed to tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScratchStore {
    entries: BTreeMap<String, Value>,
}

impl ScratchStore {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Store a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// State of a single run: conversation log, completion flag, answer.
///
/// Once `is_complete()` is true, `final_answer()` is `Some` and no further
/// step is taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique run ID
    pub id: String,

    /// Conversation log, in insertion order
    messages: Vec<Message>,

    complete: bool,

    final_answer: Option<String>,

    /// Scratch space for tools during this run
    #[serde(default)]
    pub scratch: ScratchStore,

    pub started_at: DateTime<Utc>,
}

impl RunState {
    /// Fresh state seeded with the user's question.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: vec![Message::user(query)],
            complete: false,
            final_answer: None,
            scratch: ScratchStore::default(),
            started_at: Utc::now(),
        }
    }

    /// The original question (the first user message).
    pub fn query(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append to the conversation log. Ignored once the run is complete.
    pub fn push_message(&mut self, message: Message) {
        if !self.complete {
            self.messages.push(message);
        }
    }

    /// Mark the run complete with its final answer.
    ///
    /// Returns `false` (leaving state untouched) if already complete.
    pub fn finish(&mut self, answer: impl Into<String>) -> bool {
        if self.complete {
            return false;
        }
        self.final_answer = Some(answer.into());
        self.complete = true;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }
}
