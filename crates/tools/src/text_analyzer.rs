//! Text analyzer tool — keyword sentiment, keyword extraction, length stats.

use async_trait::async_trait;
use serde_json::json;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ParamSpec, ParamType, Tool, ToolContext, ToolDescriptor, ToolInput, ToolResult};

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "amazing", "love", "like", "happy", "satisfied", "perfect",
    "wonderful",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "hate", "poor", "disappointed", "problem", "error", "fail",
    "broken",
];
const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "this", "that", "are", "was", "were", "have", "has",
    "not", "you", "your", "from", "its",
];
const MAX_KEYWORDS: usize = 10;

pub struct TextAnalyzerTool;

impl TextAnalyzerTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "text_analyzer",
            "Analyze a piece of text: sentiment, most frequent keywords, or length statistics.",
        )
        .param(ParamSpec::required("text", ParamType::String, "The text to analyze"))
        .param(
            ParamSpec::optional("analysis_type", ParamType::String, "Kind of analysis")
                .with_default(json!("sentiment"))
                .with_allowed([json!("sentiment"), json!("keywords"), json!("length")]),
        )
        .example(json!({"text": "This product is great, I love it", "analysis_type": "sentiment"}))
        .example(json!({"text": "Rust makes systems programming safe", "analysis_type": "keywords"}))
    }
}

#[async_trait]
impl Tool for TextAnalyzerTool {
    async fn invoke(
        &self,
        input: ToolInput,
        _ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let text = input["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
        let analysis_type = input
            .get("analysis_type")
            .and_then(|v| v.as_str())
            .unwrap_or("sentiment");

        let data = match analysis_type {
            "sentiment" => sentiment(text),
            "keywords" => keywords(text),
            "length" => length(text),
            other => {
                return Err(ToolError::failed(
                    "text_analyzer",
                    format!("unsupported analysis type: {other}"),
                ));
            }
        };
        Ok(ToolResult::ok(data))
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn sentiment(text: &str) -> serde_json::Value {
    let words = words(text);
    let count = |lexicon: &[&str]| {
        words
            .iter()
            .filter(|w| lexicon.iter().any(|l| w.starts_with(l)))
            .count()
    };
    let positive = count(POSITIVE_WORDS);
    let negative = count(NEGATIVE_WORDS);

    let (label, score) = if positive > negative {
        ("positive", (0.5 + (positive - negative) as f64 * 0.1).min(0.9))
    } else if negative > positive {
        ("negative", (0.5 - (negative - positive) as f64 * 0.1).max(0.1))
    } else {
        ("neutral", 0.5)
    };

    json!({
        "sentiment": label,
        "confidence": (score * 100.0).round() / 100.0,
        "positive_words": positive,
        "negative_words": negative,
    })
}

fn keywords(text: &str) -> serde_json::Value {
    let words = words(text);
    // first-seen order breaks frequency ties
    let mut freq: Vec<(String, usize)> = Vec::new();
    for word in words
        .iter()
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.as_str()))
    {
        match freq.iter_mut().find(|(w, _)| w == word) {
            Some((_, n)) => *n += 1,
            None => freq.push((word.clone(), 1)),
        }
    }
    freq.sort_by(|a, b| b.1.cmp(&a.1));
    freq.truncate(MAX_KEYWORDS);

    let keywords: Vec<_> = freq
        .into_iter()
        .map(|(word, frequency)| json!({"word": word, "frequency": frequency}))
        .collect();
    json!({
        "keywords": keywords,
        "total_words": words.len(),
    })
}

fn length(text: &str) -> serde_json::Value {
    json!({
        "character_count": text.chars().count(),
        "word_count": text.split_whitespace().count(),
        "line_count": text.lines().count().max(1),
        "sentence_count": text
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count(),
    })
}
