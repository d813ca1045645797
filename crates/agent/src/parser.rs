//! Response parser — turns one raw oracle reply into a [`ParsedDecision`].
//!
//! The oracle is asked to answer in a line-oriented marker format:
//!
//! ```text
//! Thought: I need to compute this.
//! Action: calculator
//! Action Input: {"expression": "2 + 2"}
//! ```
//!
//! or, once it knows the answer:
//!
//! ```text
//! Thought: I know the answer now.
//! Final Answer: 4
//! ```
//!
//! Markers must start a line, with one exception: a `Final Answer:` written
//! mid-line (`Thought: done. Final Answer: 4`) is still a final answer.
//! Matching ignores case, markdown emphasis
//! (`**Thought**:`), and `_` vs. space (`Action_Input:`). Anything after an
//! `Observation:` marker is discarded: observations come from tools, never
//! from the oracle. Parsing never fails with an error; undecodable input is
//! reported as [`ParsedDecision::ParseError`]. The result is a pure function
//! of the input text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepwise_core::tool::ToolInput;

/// Longest raw fragment kept in a `ParseError`.
const MAX_FRAGMENT_CHARS: usize = 500;

/// The structured outcome of one oracle reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedDecision {
    /// The oracle produced its final answer.
    Final { answer: String },

    /// The oracle wants to call a tool.
    Continue {
        thought: String,
        action_name: String,
        action_input: ToolInput,
    },

    /// The reply could not be decoded.
    ParseError { raw_fragment: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Thought,
    Action,
    ActionInput,
    FinalAnswer,
    Observation,
}

/// A marker line found in the reply.
struct Section<'a> {
    marker: Marker,
    /// Byte offset just past the marker's colon.
    body_start: usize,
    /// Byte offset of the next marker line (or end of text).
    body_end: usize,
    text: &'a str,
}

impl Section<'_> {
    fn body(&self) -> &str {
        self.text[self.body_start..self.body_end]
            .trim()
            .trim_start_matches('*')
            .trim()
    }
}

/// Recognize a marker at the start of `line`. Returns the marker and the
/// byte offset (within `line`) where its body begins.
fn match_marker(line: &str) -> Option<(Marker, usize)> {
    let colon = line.find(':')?;
    let head: String = line[..colon]
        .chars()
        .filter(|c| !matches!(c, '*' | '#' | '>' | '`'))
        .map(|c| if c == '_' { ' ' } else { c.to_ascii_lowercase() })
        .collect();
    let head = head.split_whitespace().collect::<Vec<_>>().join(" ");

    let marker = match head.as_str() {
        "thought" => Marker::Thought,
        "action" => Marker::Action,
        "action input" => Marker::ActionInput,
        "final answer" => Marker::FinalAnswer,
        "observation" => Marker::Observation,
        _ => return None,
    };
    Some((marker, colon + 1))
}

/// Scan `text` for marker lines, stopping at the first `Observation`.
fn scan(text: &str) -> Vec<Section<'_>> {
    let mut sections: Vec<Section<'_>> = Vec::new();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let Some((marker, body_offset)) = match_marker(line) else {
            continue;
        };
        if let Some(prev) = sections.last_mut() {
            prev.body_end = line_start;
        }
        if marker == Marker::Observation {
            return sections;
        }
        sections.push(Section {
            marker,
            body_start: line_start + body_offset,
            body_end: text.len(),
            text,
        });
    }
    sections
}

/// Parse one oracle reply.
pub fn parse_response(text: &str) -> ParsedDecision {
    let sections = scan(text);

    // A final answer anywhere wins; it runs to the end of the usable text.
    if let Some(idx) = sections.iter().position(|s| s.marker == Marker::FinalAnswer) {
        let end = sections.last().map_or(text.len(), |s| s.body_end);
        let answer = text[sections[idx].body_start..end]
            .trim()
            .trim_start_matches('*')
            .trim();
        if answer.is_empty() {
            return parse_error(text);
        }
        return ParsedDecision::Final {
            answer: answer.to_string(),
        };
    }

    if let Some(answer) = inline_final_answer(&text[..observation_cut(text)]) {
        return ParsedDecision::Final {
            answer: answer.to_string(),
        };
    }

    let find = |marker: Marker| sections.iter().find(|s| s.marker == marker);
    let (Some(thought), Some(action), Some(input)) = (
        find(Marker::Thought),
        find(Marker::Action),
        find(Marker::ActionInput),
    ) else {
        return parse_error(text);
    };

    let action_name = clean_action_name(action.body());
    if action_name.is_empty() {
        return parse_error(text);
    }

    let raw_input = input.body();
    match decode_action_input(raw_input) {
        Some(action_input) => ParsedDecision::Continue {
            thought: thought.body().to_string(),
            action_name,
            action_input,
        },
        None => parse_error(raw_input),
    }
}

/// Byte offset of the first `Observation` marker line, or the text length.
fn observation_cut(text: &str) -> usize {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if matches!(match_marker(line), Some((Marker::Observation, _))) {
            return offset;
        }
        offset += line.len();
    }
    text.len()
}

/// A `final answer:` marker anywhere in the text, preceded by whitespace or
/// `*`, whose body starts on the same line. Returns that body.
fn inline_final_answer(text: &str) -> Option<&str> {
    const NEEDLE: &str = "final answer";
    // ASCII lowercasing keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find(NEEDLE) {
        let start = from + pos;
        from = start + NEEDLE.len();
        let bounded = lower[..start]
            .chars()
            .next_back()
            .is_none_or(|c| c.is_whitespace() || c == '*');
        if !bounded {
            continue;
        }
        let Some(after) = lower[from..].trim_start_matches('*').strip_prefix(':') else {
            continue;
        };
        // the body must start on the marker's own line
        let first_line = after.split('\n').next().unwrap_or_default();
        if first_line.trim().trim_matches('*').trim().is_empty() {
            continue;
        }
        let answer = text[text.len() - after.len()..]
            .trim()
            .trim_start_matches('*')
            .trim();
        return Some(answer);
    }
    None
}

fn parse_error(fragment: &str) -> ParsedDecision {
    let fragment = fragment.trim();
    let raw_fragment = match fragment.char_indices().nth(MAX_FRAGMENT_CHARS) {
        Some((cut, _)) => fragment[..cut].to_string(),
        None => fragment.to_string(),
    };
    ParsedDecision::ParseError { raw_fragment }
}

/// The action name is the first line of the section, without decoration.
fn clean_action_name(body: &str) -> String {
    body.lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| matches!(c, '`' | '"' | '\'' | '*'))
        .trim()
        .to_string()
}

/// Decode an action-input fragment into a JSON object.
///
/// Tries, in order: the fragment as JSON (after stripping a code fence),
/// the first balanced `{...}` block in it, and that block with single
/// quotes turned into double quotes. Non-object JSON is rejected.
fn decode_action_input(raw: &str) -> Option<ToolInput> {
    let unfenced = strip_code_fence(raw);
    if let Some(map) = as_object(unfenced) {
        return Some(map);
    }
    let block = balanced_object(unfenced)?;
    as_object(block).or_else(|| as_object(&block.replace('\'', "\"")))
}

fn as_object(candidate: &str) -> Option<ToolInput> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string ("json") on the opening fence line
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// The first `{...}` block with balanced braces, skipping braces inside
/// string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
