//! Shared test helpers for loop tests.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use stepwise_core::error::OracleError;
use stepwise_core::oracle::{Oracle, OracleRequest, OracleResponse, Usage};

/// An oracle that replays a scripted sequence of replies.
///
/// Each call to `complete` pops the next entry. Once the script runs out
/// the `repeat` reply is returned forever, or, if there is none, the
/// oracle panics so an unexpected extra call fails the test loudly.
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    repeat: Option<String>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<String>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    pub fn with_results(script: Vec<Result<String, OracleError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// An oracle that gives the same reply to every call.
    pub fn repeating(reply: String) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::with_results(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let next = self.script.lock().unwrap().pop_front();
        let text = match (next, &self.repeat) {
            (Some(entry), _) => entry?,
            (None, Some(reply)) => reply.clone(),
            (None, None) => panic!("ScriptedOracle: no more replies (call #{call})"),
        };
        Ok(OracleResponse {
            text,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "scripted-model".into(),
        })
    }
}

/// A well-formed action reply.
pub fn action(thought: &str, tool: &str, input: Value) -> String {
    format!("Thought: {thought}\nAction: {tool}\nAction Input: {input}")
}

/// A well-formed final-answer reply.
pub fn final_answer(answer: &str) -> String {
    format!("Thought: I now know the answer.\nFinal Answer: {answer}")
}
