//! Weather tool — simulated current conditions for a city.
//!
//! Backed by a small fixed table; unknown cities get a neutral default
//! entry rather than an error.

use async_trait::async_trait;
use serde_json::json;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ParamSpec, ParamType, Tool, ToolContext, ToolDescriptor, ToolInput, ToolResult};

pub struct WeatherTool;

struct Conditions {
    temperature_c: i64,
    weather: &'static str,
    humidity: u32,
    wind: &'static str,
}

const DEFAULT_CONDITIONS: Conditions = Conditions {
    temperature_c: 20,
    weather: "unknown",
    humidity: 50,
    wind: "unknown",
};

fn lookup(city: &str) -> Option<Conditions> {
    let c = |temperature_c, weather, humidity, wind| Conditions {
        temperature_c,
        weather,
        humidity,
        wind,
    };
    let conditions = match city.trim().to_lowercase().as_str() {
        "beijing" => c(25, "sunny", 45, "north wind, force 3"),
        "shanghai" => c(28, "cloudy", 65, "southeast wind, force 2"),
        "guangzhou" => c(32, "showers", 78, "south wind, force 2"),
        "shenzhen" => c(30, "sunny", 70, "east wind, force 3"),
        "chengdu" => c(22, "overcast", 80, "calm"),
        "london" => c(14, "light rain", 82, "southwest wind, force 4"),
        "new york" => c(18, "partly cloudy", 60, "west wind, force 3"),
        "tokyo" => c(21, "clear", 55, "northeast wind, force 2"),
        _ => return None,
    };
    Some(conditions)
}

impl WeatherTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "get_weather",
            "Look up current weather for a city: temperature, conditions, humidity and wind.",
        )
        .param(ParamSpec::required(
            "city",
            ParamType::String,
            "City name, e.g. 'Beijing' or 'London'",
        ))
        .example(json!({"city": "Beijing"}))
        .example(json!({"city": "Tokyo"}))
    }
}

#[async_trait]
impl Tool for WeatherTool {
    async fn invoke(
        &self,
        input: ToolInput,
        _ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let city = input["city"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'city' argument".into()))?;

        let (conditions, known) = match lookup(city) {
            Some(c) => (c, true),
            None => (DEFAULT_CONDITIONS, false),
        };

        Ok(ToolResult::ok(json!({
            "city": city,
            "temperature": conditions.temperature_c,
            "weather": conditions.weather,
            "humidity": conditions.humidity,
            "wind": conditions.wind,
        }))
        .with_metadata("simulated", true)
        .with_metadata("known_city", known))
    }
}
