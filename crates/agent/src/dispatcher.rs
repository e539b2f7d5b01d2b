//! Tool dispatcher: run the tool calls of one model response.
//!
//! Each call is spawned as soon as it is received, so tools in a batch run
//! concurrently. Results are always collected in call order. Lookup,
//! validation and execution failures become failure outputs; they never
//! abort the turn.

use std::sync::Arc;

use keilpilot_core::error::ToolError;
use keilpilot_core::message::ToolCall;
use keilpilot_core::tool::{Tool, ToolOutput, ToolRegistry};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A call whose tool is running in the background.
pub struct PendingCall {
    call: ToolCall,
    handle: JoinHandle<ToolOutput>,
}

impl PendingCall {
    pub fn call(&self) -> &ToolCall {
        &self.call
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        // No-op once the task has finished
        self.handle.abort();
    }
}

/// A finished call and its normalized output.
#[derive(Debug, Clone)]
pub struct DispatchedCall {
    pub call: ToolCall,
    pub output: ToolOutput,
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Start executing `call` and return immediately.
    pub fn dispatch(&self, call: ToolCall, cancel: CancellationToken) -> PendingCall {
        let tool = self.registry.get(&call.tool_name);
        let task_call = call.clone();

        let handle = tokio::spawn(async move {
            match execute(tool, task_call.clone(), cancel).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(
                        tool = %task_call.tool_name,
                        call_id = %task_call.call_id,
                        error = %e,
                        "Tool call failed"
                    );
                    ToolOutput::failure(e.to_string())
                }
            }
        });

        PendingCall { call, handle }
    }

    /// Wait for every pending call, preserving their order.
    pub async fn join(&self, pending: Vec<PendingCall>) -> Vec<DispatchedCall> {
        let mut finished = Vec::with_capacity(pending.len());
        for mut p in pending {
            let output = match (&mut p.handle).await {
                Ok(output) => output,
                Err(e) => ToolOutput::failure(
                    ToolError::ExecutionFailed {
                        tool_name: p.call.tool_name.clone(),
                        reason: e.to_string(),
                    }
                    .to_string(),
                ),
            };
            debug!(
                tool = %p.call.tool_name,
                call_id = %p.call.call_id,
                success = output.success,
                "Tool call finished"
            );
            finished.push(DispatchedCall {
                call: p.call.clone(),
                output,
            });
        }
        finished
    }
}

async fn execute(
    tool: Option<Arc<dyn Tool>>,
    call: ToolCall,
    cancel: CancellationToken,
) -> Result<ToolOutput, ToolError> {
    let tool = tool.ok_or_else(|| ToolError::NotFound(call.tool_name.clone()))?;
    let input = validate_input(tool.as_ref(), call.input)?;

    info!(
        tool = %call.tool_name,
        call_id = %call.call_id,
        "{}",
        tool.invocation_message(&input)
    );
    tool.invoke(input, cancel).await
}

/// Parse and check a call's input against the tool's schema.
///
/// Accepts an object, a JSON string encoding an object, or nothing. Checks
/// `required` fields and the primitive `type` of each declared property.
pub fn validate_input(tool: &dyn Tool, input: Value) -> Result<Value, ToolError> {
    let invalid = |reason: String| ToolError::InvalidInput {
        tool_name: tool.name().to_string(),
        reason,
    };

    let input = match input {
        Value::Null => Value::Object(Default::default()),
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| invalid(format!("input is not valid JSON: {e}")))?,
        other => other,
    };
    let Value::Object(fields) = &input else {
        return Err(invalid("input must be a JSON object".into()));
    };

    let schema = tool.input_schema();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                return Err(invalid(format!("missing required field '{name}'")));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, value) in fields {
            let expected = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = expected
                && !matches_type(value, expected)
            {
                return Err(invalid(format!("field '{name}' must be of type {expected}")));
            }
        }
    }

    Ok(input)
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
