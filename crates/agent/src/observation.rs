//! Observation formatting — how a [`ToolResult`] is shown to the oracle.

use serde_json::Value;
use stepwise_core::tool::ToolResult;

/// Observations longer than this are truncated.
pub const MAX_OBSERVATION_CHARS: usize = 4000;

const TRUNCATION_SUFFIX: &str = "… [truncated]";

/// Render a tool result as observation text.
///
/// - object payload: `Tool succeeded:` then one `key: value` line per field
/// - any other payload: `Tool succeeded: <value>`
/// - failure: `Tool failed: <error>`
pub fn format_observation(result: &ToolResult) -> String {
    let text = match (result.is_success(), result.data(), result.error()) {
        (true, Some(Value::Object(map)), _) if !map.is_empty() => {
            let mut out = String::from("Tool succeeded:");
            for (key, value) in map {
                out.push('\n');
                out.push_str(key);
                out.push_str(": ");
                out.push_str(&scalar_text(value));
            }
            out
        }
        (true, Some(value), _) => format!("Tool succeeded: {}", scalar_text(value)),
        (true, None, _) => "Tool succeeded".to_string(),
        (false, _, error) => format!("Tool failed: {}", error.unwrap_or("unknown error")),
    };
    truncate(text)
}

/// Strings render bare; everything else as compact JSON.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: String) -> String {
    match text.char_indices().nth(MAX_OBSERVATION_CHARS) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_SUFFIX),
        None => text,
    }
}
