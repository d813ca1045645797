//! Built-in tool implementations for stepwise.
//!
//! Tools give the reasoning loop the ability to act: do math, read the
//! clock, search (simulated), check the weather (simulated), analyze text
//! and remember values for the rest of a run.

pub mod calculator;
pub mod current_time;
pub mod memory_store;
pub mod text_analyzer;
pub mod weather;
pub mod web_search;

use std::sync::Arc;

use stepwise_core::error::RegistryError;
use stepwise_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use current_time::CurrentTimeTool;
pub use memory_store::MemoryStoreTool;
pub use text_analyzer::TextAnalyzerTool;
pub use weather::WeatherTool;
pub use web_search::WebSearchTool;

/// Create a registry with all six built-in tools, in a fixed order.
pub fn default_registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(CalculatorTool::descriptor(), Arc::new(CalculatorTool))?;
    registry.register(CurrentTimeTool::descriptor(), Arc::new(CurrentTimeTool))?;
    registry.register(WebSearchTool::descriptor(), Arc::new(WebSearchTool))?;
    registry.register(WeatherTool::descriptor(), Arc::new(WeatherTool))?;
    registry.register(TextAnalyzerTool::descriptor(), Arc::new(TextAnalyzerTool))?;
    registry.register(MemoryStoreTool::descriptor(), Arc::new(MemoryStoreTool))?;
    Ok(registry)
}
