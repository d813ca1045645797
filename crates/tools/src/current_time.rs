//! Current time tool.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use serde_json::json;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ParamSpec, ParamType, Tool, ToolContext, ToolDescriptor, ToolInput, ToolResult};

pub struct CurrentTimeTool;

impl CurrentTimeTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "current_time",
            "Get the current date, time and weekday.",
        )
        .param(
            ParamSpec::optional("timezone", ParamType::String, "Which clock to read")
                .with_default(json!("local"))
                .with_allowed([json!("local"), json!("utc")]),
        )
        .example(json!({"timezone": "utc"}))
    }
}

fn describe<Tz: TimeZone>(timezone: &str, now: DateTime<Tz>) -> serde_json::Value
where
    Tz::Offset: std::fmt::Display,
{
    json!({
        "timezone": timezone,
        "current_time": now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "weekday": now.format("%A").to_string(),
        "timestamp": now.timestamp(),
    })
}

#[async_trait]
impl Tool for CurrentTimeTool {
    async fn invoke(
        &self,
        input: ToolInput,
        _ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let timezone = input
            .get("timezone")
            .and_then(|v| v.as_str())
            .unwrap_or("local");

        let data = match timezone {
            "local" => describe(timezone, Local::now()),
            "utc" => describe(timezone, Utc::now()),
            other => {
                return Err(ToolError::failed(
                    "current_time",
                    format!("unsupported timezone: {other}"),
                ));
            }
        };
        Ok(ToolResult::ok(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::state::ScratchStore;

    #[tokio::test]
    async fn utc_time_has_expected_fields() {
        let mut scratch = ScratchStore::default();
        let mut ctx = ToolContext::new(1, &mut scratch);
        let input = json!({"timezone": "utc"}).as_object().cloned().unwrap();
        let before = Utc::now().timestamp();
        let result = CurrentTimeTool.invoke(input, &mut ctx).await.unwrap();
        let data = result.data().unwrap();
        assert_eq!(data["timezone"], "utc");
        assert_eq!(data["current_time"].as_str().unwrap().len(), 19);
        assert!(data["timestamp"].as_i64().unwrap() >= before);
    }

    #[test]
    fn default_is_local() {
        let validated = CurrentTimeTool::descriptor()
            .validate(&ToolInput::new())
            .unwrap();
        assert_eq!(validated["timezone"], "local");
    }

    #[tokio::test]
    async fn unknown_timezone_is_error() {
        let mut scratch = ScratchStore::default();
        let mut ctx = ToolContext::new(1, &mut scratch);
        let input = json!({"timezone": "mars"}).as_object().cloned().unwrap();
        assert!(CurrentTimeTool.invoke(input, &mut ctx).await.is_err());
    }
}
