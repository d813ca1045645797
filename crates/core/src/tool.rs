//! Tool trait and registry — the abstraction over callable capabilities.
//!
//! A tool is a named callable with a declared parameter schema. The
//! registry maps each name to its immutable [`ToolDescriptor`] and its
//! [`Tool`] implementation. Input is validated against the descriptor
//! before a tool body ever sees it, so tools only handle well-typed input.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::{RegistryError, ToolError};
use crate::state::ScratchStore;

/// Validated, structured tool input: parameter name → value.
pub type ToolInput = Map<String, Value>;

// ── Descriptor ────────────────────────────────────────────────────────────

/// Semantic type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamType {
    /// JSON-Schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        }
    }

    /// Whether `value` is an instance of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// Declaration of a single tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
    /// Closed set of permitted values, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,
}

impl ParamSpec {
    /// A parameter the caller must supply.
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            description: description.into(),
            allowed: Vec::new(),
        }
    }

    /// A parameter the caller may omit.
    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    /// Value filled in when the parameter is omitted.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Restrict the parameter to a closed set of values.
    pub fn with_allowed(mut self, allowed: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = allowed.into_iter().collect();
        self
    }
}

/// Immutable description of a tool: what the oracle is told about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            examples: Vec::new(),
        }
    }

    /// Append a parameter (order is preserved in rendering).
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Append an example invocation.
    pub fn example(mut self, example: Value) -> Self {
        self.examples.push(example);
        self
    }

    /// Check the descriptor itself is well-formed.
    fn check(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidDescriptor {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(invalid("name must be non-empty and contain no whitespace"));
        }
        for (i, p) in self.params.iter().enumerate() {
            if self.params[..i].iter().any(|q| q.name == p.name) {
                return Err(invalid(&format!("duplicate parameter '{}'", p.name)));
            }
        }
        Ok(())
    }

    /// Validate oracle-supplied input against the parameter specs.
    ///
    /// Rejects unknown names, missing required parameters, type mismatches
    /// and values outside an `allowed` set. Absent optional parameters get
    /// their default. `null` counts as absent.
    pub fn validate(&self, input: &ToolInput) -> Result<ToolInput, ToolError> {
        let invalid = |msg: String| {
            ToolError::InvalidArguments(format!("invalid input for tool '{}': {msg}", self.name))
        };

        if let Some(unknown) = input
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(invalid(format!("unknown parameter '{unknown}'")));
        }

        let mut validated = ToolInput::new();
        for spec in &self.params {
            match input.get(&spec.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    if !spec.param_type.accepts(value) {
                        return Err(invalid(format!(
                            "parameter '{}' must be of type {}, got {}",
                            spec.name,
                            spec.param_type.as_str(),
                            json_type_name(value)
                        )));
                    }
                    if !spec.allowed.is_empty() && !spec.allowed.contains(value) {
                        return Err(invalid(format!(
                            "parameter '{}' must be one of {}",
                            spec.name,
                            Value::Array(spec.allowed.clone())
                        )));
                    }
                    validated.insert(spec.name.clone(), value.clone());
                }
                None if spec.required => {
                    return Err(invalid(format!("missing required parameter '{}'", spec.name)));
                }
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(validated)
    }

    /// JSON-Schema object describing the parameters.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = Map::new();
            if p.param_type != ParamType::Any {
                prop.insert("type".into(), Value::from(p.param_type.as_str()));
            }
            if !p.description.is_empty() {
                prop.insert("description".into(), Value::from(p.description.clone()));
            }
            if let Some(default) = &p.default {
                prop.insert("default".into(), default.clone());
            }
            if !p.allowed.is_empty() {
                prop.insert("enum".into(), Value::Array(p.allowed.clone()));
            }
            properties.insert(p.name.clone(), Value::Object(prop));
        }
        let required: Vec<Value> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| Value::from(p.name.clone()))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Render the descriptor as a prompt block for the oracle.
    pub fn render(&self) -> String {
        let mut out = format!("- {}: {}\n", self.name, self.description);
        if self.params.is_empty() {
            out.push_str("  Parameters: none\n");
        } else {
            out.push_str("  Parameters:\n");
            for p in &self.params {
                let mut line = format!(
                    "    - {} ({}, {}",
                    p.name,
                    p.param_type.as_str(),
                    if p.required { "required" } else { "optional" }
                );
                if let Some(default) = &p.default {
                    line.push_str(&format!(", default {default}"));
                }
                line.push(')');
                if !p.description.is_empty() {
                    line.push_str(&format!(": {}", p.description));
                }
                if !p.allowed.is_empty() {
                    line.push_str(&format!(" One of {}.", Value::Array(p.allowed.clone())));
                }
                out.push_str(&line);
                out.push('\n');
            }
        }
        if !self.examples.is_empty() {
            let examples: Vec<String> = self.examples.iter().take(2).map(|e| e.to_string()).collect();
            out.push_str(&format!("  Examples: {}\n", examples.join(", ")));
        }
        out
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Result ────────────────────────────────────────────────────────────────

/// The outcome of one tool dispatch.
///
/// Exactly one of `data` (on success) or `error` (on failure) is
/// populated; the constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
    timestamp: DateTime<Utc>,
}

impl ToolResult {
    /// A successful result carrying `data`.
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// A failed result carrying an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builder-style metadata insertion.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_metadata(key, value);
        self
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        ToolResult::failure(err.to_string()).with_metadata("error_kind", err.kind())
    }
}

// ── Tool trait ────────────────────────────────────────────────────────────

/// Per-invocation context handed to a tool.
///
/// Gives access to the run-scoped scratch store; nothing here outlives
/// the run that owns it.
pub struct ToolContext<'a> {
    /// 1-based index of the step this invocation belongs to.
    pub step: usize,
    scratch: &'a mut ScratchStore,
}

impl<'a> ToolContext<'a> {
    pub fn new(step: usize, scratch: &'a mut ScratchStore) -> Self {
        Self { step, scratch }
    }

    pub fn scratch(&mut self) -> &mut ScratchStore {
        self.scratch
    }
}

/// A single-capability callable.
///
/// `invoke` receives input that has already passed
/// [`ToolDescriptor::validate`]. Returning `Err` or panicking is allowed;
/// the loop converts either into a failing [`ToolResult`].
#[async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(
        &self,
        input: ToolInput,
        ctx: &mut ToolContext<'_>,
    ) -> std::result::Result<ToolResult, ToolError>;
}

/// Adapter turning a synchronous closure into a [`Tool`].
///
/// The closure runs on tokio's blocking pool against a copy of the scratch
/// store, so a slow or stuck closure never stalls the caller's deadline.
/// Scratch writes are committed only when the call completes; a call
/// abandoned at its deadline leaves the store untouched. A panic in the
/// closure is re-raised in the caller.
pub struct FnTool<F> {
    f: Arc<F>,
}

impl<F> FnTool<F>
where
    F: Fn(ToolInput, &mut ToolContext<'_>) -> std::result::Result<ToolResult, ToolError>
        + Send
        + Sync
        + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(ToolInput, &mut ToolContext<'_>) -> std::result::Result<ToolResult, ToolError>
        + Send
        + Sync
        + 'static,
{
    async fn invoke(
        &self,
        input: ToolInput,
        ctx: &mut ToolContext<'_>,
    ) -> std::result::Result<ToolResult, ToolError> {
        let f = Arc::clone(&self.f);
        let step = ctx.step;
        let mut scratch = ctx.scratch().clone();

        let call = tokio::task::spawn_blocking(move || {
            let result = (*f)(input, &mut ToolContext::new(step, &mut scratch));
            (result, scratch)
        });
        match call.await {
            Ok((result, scratch)) => {
                *ctx.scratch() = scratch;
                result
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(ToolError::failed("fn_tool", format!("blocking task aborted: {e}"))),
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────

/// A registry of available tools.
///
/// Built once before any run starts, then shared read-only (typically as
/// `Arc<ToolRegistry>`) across concurrent runs. Descriptors are kept in
/// registration order so oracle context is reproducible.
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        tool: Arc<dyn Tool>,
    ) -> Result<(), RegistryError> {
        descriptor.check()?;
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        self.index
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        self.tools.push(tool);
        Ok(())
    }

    /// Register a tool, explicitly replacing any existing one of the same
    /// name in place. Returns the replaced descriptor.
    pub fn register_or_replace(
        &mut self,
        descriptor: ToolDescriptor,
        tool: Arc<dyn Tool>,
    ) -> Result<Option<ToolDescriptor>, RegistryError> {
        descriptor.check()?;
        match self.index.get(&descriptor.name) {
            Some(&pos) => {
                warn!(tool = %descriptor.name, "Replacing registered tool");
                self.tools[pos] = tool;
                Ok(Some(std::mem::replace(&mut self.descriptors[pos], descriptor)))
            }
            None => {
                self.register(descriptor, tool)?;
                Ok(None)
            }
        }
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Result<(&ToolDescriptor, &Arc<dyn Tool>), ToolError> {
        self.index
            .get(name)
            .map(|&pos| (&self.descriptors[pos], &self.tools[pos]))
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// All descriptors, in registration order.
    pub fn schemas(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
