//! `stepwise ask` — answer a single question.

use std::sync::Arc;
use std::time::Duration;
use stepwise_agent::{CancellationToken, LoopConfig, LoopEvent, ReasoningLoop, RunOutcome};
use stepwise_config::AppConfig;
use stepwise_providers::OpenAiCompatOracle;
use tokio_stream::StreamExt;

pub async fn run(
    query: String,
    max_steps: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(max_steps) = max_steps {
        config.agent.max_steps = max_steps;
    }
    tracing::debug!(config = ?config, "Configuration loaded");

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    STEPWISE_API_KEY, OPENAI_API_KEY or DEEPSEEK_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let oracle = Arc::new(OpenAiCompatOracle::from_settings(&config.oracle)?);
    let tools = Arc::new(stepwise_tools::default_registry()?);
    let agent = ReasoningLoop::new(oracle, tools, loop_config(&config));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Cancelling after the current step...");
            on_ctrl_c.cancel();
        }
    });

    let (mut events, result) = agent.spawn(query, cancel).into_stream();
    while let Some(event) = events.next().await {
        if !json {
            print_progress(&event);
        }
    }
    let result = result.await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    if !result.trace.is_empty() {
        println!("{}", result.trace.render());
    }
    println!("Answer: {}", result.answer);
    println!();
    println!("  ({}, {} oracle calls)", result.trace.summary(), result.oracle_calls);

    match result.outcome {
        RunOutcome::Answered | RunOutcome::BudgetExhausted => Ok(()),
        RunOutcome::Cancelled => Err("run cancelled".into()),
        RunOutcome::Failed { failure } => Err(format!("run failed: {failure:?}").into()),
    }
}

/// Translate file settings into loop limits.
pub fn loop_config(config: &AppConfig) -> LoopConfig {
    LoopConfig {
        model: config.oracle.model.clone(),
        temperature: config.oracle.temperature,
        max_tokens: Some(config.oracle.max_tokens),
        max_steps: config.agent.max_steps,
        context_budget_tokens: config.agent.context_budget_tokens,
        tool_timeout: Duration::from_millis(config.agent.tool_timeout_ms),
        oracle_retries: config.agent.oracle_retries,
        oracle_backoff: Duration::from_millis(config.agent.oracle_backoff_ms),
        oracle_timeout: Duration::from_secs(config.oracle.timeout_secs),
    }
}

fn print_progress(event: &LoopEvent) {
    match event {
        LoopEvent::Thinking { step, attempt: 1 } => eprintln!("  [{step}] thinking..."),
        LoopEvent::ParseRetry { step, .. } => {
            eprintln!("  [{step}] reply not understood, asking again")
        }
        LoopEvent::ToolCall { step, tool, input } => eprintln!(
            "  [{step}] {tool} {}",
            serde_json::Value::Object(input.clone())
        ),
        LoopEvent::Observation {
            step,
            success,
            duration_ms,
            ..
        } => eprintln!(
            "  [{step}] {} in {duration_ms}ms",
            if *success { "ok" } else { "failed" }
        ),
        _ => {}
    }
}
