//! Web search tool — simulated, deterministic search results.
//!
//! No network access: results are generated from the query so runs are
//! reproducible and the loop can be exercised end-to-end offline.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ParamSpec, ParamType, Tool, ToolContext, ToolDescriptor, ToolInput, ToolResult};

const MAX_RESULTS: u64 = 10;

pub struct WebSearchTool;

impl WebSearchTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "web_search",
            "Search the web for background knowledge or recent information. \
             Returns titles, URLs and snippets.",
        )
        .param(ParamSpec::required(
            "query",
            ParamType::String,
            "A short, specific search query",
        ))
        .param(
            ParamSpec::optional(
                "num_results",
                ParamType::Integer,
                "Number of results to return, 1 to 10",
            )
            .with_default(json!(5)),
        )
        .example(json!({"query": "rust async runtime comparison", "num_results": 3}))
        .example(json!({"query": "latest AI research trends"}))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    async fn invoke(
        &self,
        input: ToolInput,
        _ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let query = input["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'query' must not be empty".into()));
        }

        let num_results = input
            .get("num_results")
            .and_then(|v| v.as_f64())
            .map(|n| n as u64)
            .unwrap_or(5);
        if !(1..=MAX_RESULTS).contains(&num_results) {
            return Err(ToolError::InvalidArguments(format!(
                "'num_results' must be between 1 and {MAX_RESULTS}, got {num_results}"
            )));
        }

        let results = generate_mock_results(query, num_results as usize);
        Ok(ToolResult::ok(json!({
            "query": query,
            "total_results": results.len(),
            "results": results,
        }))
        .with_metadata("simulated", true))
    }
}

#[derive(Debug, Clone, Serialize)]
struct SearchResult {
    title: String,
    url: String,
    snippet: String,
    relevance: f64,
}

fn generate_mock_results(query: &str, count: usize) -> Vec<SearchResult> {
    (0..count)
        .map(|i| SearchResult {
            title: format!("Result {} for: {}", i + 1, query),
            url: format!("https://example.com/search?q={}&p={}", urlencode(query), i + 1),
            snippet: format!("Summary of result {} about '{}'.", i + 1, query),
            relevance: ((0.95 - i as f64 * 0.05) * 100.0).round() / 100.0,
        })
        .collect()
}

fn urlencode(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join("+")
}
