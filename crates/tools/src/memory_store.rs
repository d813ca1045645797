//! Memory store tool — set/get/delete on the run's scratch store.
//!
//! Values live only as long as the run that stored them.

use async_trait::async_trait;
use serde_json::{Value, json};
use stepwise_core::error::ToolError;
use stepwise_core::tool::{ParamSpec, ParamType, Tool, ToolContext, ToolDescriptor, ToolInput, ToolResult};
use tracing::debug;

pub struct MemoryStoreTool;

impl MemoryStoreTool {
    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "memory_store",
            "Remember a value for later steps of this task, read it back, or forget it.",
        )
        .param(ParamSpec::required("key", ParamType::String, "Name to store the value under"))
        .param(ParamSpec::optional(
            "value",
            ParamType::Any,
            "Value to store (required for 'set')",
        ))
        .param(
            ParamSpec::optional("operation", ParamType::String, "What to do with the key")
                .with_default(json!("set"))
                .with_allowed([json!("set"), json!("get"), json!("delete")]),
        )
        .example(json!({"key": "population", "value": 21540000, "operation": "set"}))
        .example(json!({"key": "population", "operation": "get"}))
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    async fn invoke(
        &self,
        input: ToolInput,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let key = input["key"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'key' argument".into()))?;
        let operation = input
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("set");
        let step = ctx.step;
        let scratch = ctx.scratch();

        match operation {
            "set" => {
                let value = input.get("value").cloned().ok_or_else(|| {
                    ToolError::InvalidArguments("'value' is required for operation 'set'".into())
                })?;
                let replaced = scratch.set(key, value.clone()).is_some();
                debug!(key, replaced, step, "Stored scratch value");
                Ok(ToolResult::ok(json!({
                    "operation": "set",
                    "key": key,
                    "value": value,
                    "replaced": replaced,
                })))
            }
            "get" => {
                let data = match scratch.get(key) {
                    Some(value) => json!({
                        "operation": "get",
                        "key": key,
                        "value": value,
                        "found": true,
                    }),
                    None => json!({
                        "operation": "get",
                        "key": key,
                        "found": false,
                    }),
                };
                Ok(ToolResult::ok(data))
            }
            "delete" => match scratch.delete(key) {
                Some(_) => Ok(ToolResult::ok(json!({
                    "operation": "delete",
                    "key": key,
                    "deleted": true,
                }))),
                None => Err(ToolError::failed(
                    "memory_store",
                    format!("key '{key}' does not exist"),
                )),
            },
            other => Err(ToolError::failed(
                "memory_store",
                format!("unsupported operation: {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::state::ScratchStore;

    async fn call(scratch: &mut ScratchStore, args: Value) -> Result<ToolResult, ToolError> {
        let mut ctx = ToolContext::new(1, scratch);
        let input = MemoryStoreTool::descriptor()
            .validate(args.as_object().unwrap())
            .unwrap();
        MemoryStoreTool.invoke(input, &mut ctx).await
    }

    #[tokio::test]
    async fn set_then_get() {
        let mut scratch = ScratchStore::default();
        call(&mut scratch, json!({"key": "city", "value": "Paris"}))
            .await
            .unwrap();
        let result = call(&mut scratch, json!({"key": "city", "operation": "get"}))
            .await
            .unwrap();
        let data = result.data().unwrap();
        assert_eq!(data["found"], true);
        assert_eq!(data["value"], "Paris");
    }

    #[tokio::test]
    async fn get_missing_key_succeeds_not_found() {
        let mut scratch = ScratchStore::default();
        let result = call(&mut scratch, json!({"key": "nope", "operation": "get"}))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.data().unwrap()["found"], false);
    }

    #[tokio::test]
    async fn delete_missing_key_fails() {
        let mut scratch = ScratchStore::default();
        let err = call(&mut scratch, json!({"key": "nope", "operation": "delete"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn set_requires_value() {
        let mut scratch = ScratchStore::default();
        assert!(call(&mut scratch, json!({"key": "k"})).await.is_err());
        assert!(scratch.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let mut scratch = ScratchStore::default();
        call(&mut scratch, json!({"key": "k", "value": 1})).await.unwrap();
        call(&mut scratch, json!({"key": "k", "operation": "delete"}))
            .await
            .unwrap();
        assert!(scratch.get("k").is_none());
    }
}
