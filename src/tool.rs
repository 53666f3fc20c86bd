//! Tool manager (spec §4.6)
//!
//! A registry of tool descriptors plus a state machine per in-flight call:
//!
//! ```text
//! QUEUED --start--> RUNNING --complete--> COMPLETED(OK)
//!                     |--cancel(req)--> CANCELLING --ack--> COMPLETED(CANCELLED)
//!                     |--fail-------> COMPLETED(ERROR)
//! QUEUED --cancel--> COMPLETED(CANCELLED)
//! ```
//!
//! Execution itself is delegated: either to a registered [`ToolHandler`], or
//! to an external collaborator that observes `TOOL_CALL` on the wire and
//! replies with `TOOL_UPDATE`/`TOOL_DONE` envelopes. This module only tracks
//! state and enforces the transition rules; it does not run tool code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HaipError, Result};

/// A tool's advertised description and JSON-schema contracts (spec §4.6,
/// `TOOL_LIST`/`TOOL_SCHEMA`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description, advertised via `TOOL_LIST`.
    pub description: String,
    /// JSON Schema for `params`.
    pub input_schema: Value,
    /// JSON Schema for `result`.
    pub output_schema: Value,
}

/// What a call's emitted progress update carries (spec §4.6 `TOOL_UPDATE`).
#[derive(Debug, Clone, Default)]
pub struct ToolProgress {
    /// Free-form progress fraction or counter, tool-defined.
    pub progress: Option<Value>,
    /// Partial result content emitted before completion.
    pub partial: Option<Value>,
}

/// Callback handed to a [`ToolHandler`] so it can emit `TOOL_UPDATE` before
/// returning its terminal result (spec §6.4).
#[async_trait]
pub trait UpdateEmitter: Send + Sync {
    /// Emit a non-terminal status update for the in-flight call.
    async fn emit_update(&self, status: CallStatus, progress: ToolProgress);
}

/// An in-process tool implementation (spec §4.6: "an optional
/// implementation").
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the call, returning the `TOOL_DONE.result` payload on success.
    async fn invoke(
        &self,
        params: Value,
        call_id: &str,
        emitter: &dyn UpdateEmitter,
    ) -> std::result::Result<Value, String>;
}

/// Status of a tool call, matching the wire enum in `TOOL_UPDATE`/`TOOL_DONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallStatus {
    /// Accepted, not yet started.
    Queued,
    /// Executing.
    Running,
    /// Cancellation requested, awaiting acknowledgement.
    Cancelling,
    /// Terminal: completed successfully.
    Ok,
    /// Terminal: cancelled before or during execution.
    Cancelled,
    /// Terminal: failed.
    Error,
}

impl CallStatus {
    /// Whether this status is one of the three terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Ok | CallStatus::Cancelled | CallStatus::Error)
    }
}

/// State tracked for one `call_id` over its lifetime.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Correlates this call across `TOOL_CALL`/`TOOL_UPDATE`/`TOOL_DONE`.
    pub call_id: String,
    /// Name of the tool invoked.
    pub tool: String,
    /// The run this call is tagged with, if any.
    pub run_id: Option<String>,
    /// Current lifecycle status.
    pub status: CallStatus,
}

/// Registry of tool descriptors plus call-state tracking for one session.
#[derive(Default)]
pub struct ToolManager {
    descriptors: HashMap<String, ToolDescriptor>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    calls: HashMap<String, ToolCall>,
}

impl ToolManager {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool descriptor, with an optional in-process handler. A
    /// descriptor with no handler is executed by an external collaborator
    /// watching `TOOL_CALL` on the wire. The handler is reference-counted so
    /// callers can invoke it after releasing the lock guarding this manager,
    /// since invocation is async and the session lock must never be held
    /// across an `.await`.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: Option<Arc<dyn ToolHandler>>) {
        if let Some(handler) = handler {
            self.handlers.insert(descriptor.name.clone(), handler);
        }
        self.descriptors.insert(descriptor.name.clone(), descriptor);
    }

    /// The `TOOL_LIST` advertisement: name and description of every
    /// registered tool.
    pub fn list(&self) -> Vec<(String, String)> {
        self.descriptors
            .values()
            .map(|d| (d.name.clone(), d.description.clone()))
            .collect()
    }

    /// Serve `TOOL_SCHEMA {tool}`.
    pub fn schema(&self, tool: &str) -> Result<&ToolDescriptor> {
        self.descriptors
            .get(tool)
            .ok_or_else(|| HaipError::ToolNotFound(tool.to_string()))
    }

    /// Clone a handle to `tool`'s in-process [`ToolHandler`], if registered.
    pub fn handler_for(&self, tool: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(tool).cloned()
    }

    /// Handle an inbound `TOOL_CALL`. Returns `Err` with a terminal status
    /// already implied (unknown tool / schema violation bypass `QUEUED`
    /// entirely per spec §4.6) so the caller can emit `TOOL_DONE` directly
    /// without ever registering call state. `params` is validated against
    /// the tool's `input_schema` before the call is queued.
    pub fn start_call(
        &mut self,
        call_id: String,
        tool: String,
        run_id: Option<String>,
        params: &Value,
    ) -> Result<&ToolCall> {
        let descriptor = self
            .descriptors
            .get(&tool)
            .ok_or_else(|| HaipError::ToolNotFound(tool.clone()))?;

        let validator = jsonschema::validator_for(&descriptor.input_schema)
            .map_err(|e| HaipError::ToolSchemaViolation(e.to_string()))?;
        validator
            .validate(params)
            .map_err(|e| HaipError::ToolSchemaViolation(e.to_string()))?;

        let call = ToolCall {
            call_id: call_id.clone(),
            tool,
            run_id,
            status: CallStatus::Queued,
        };
        self.calls.insert(call_id.clone(), call);
        Ok(self.calls.get(&call_id).expect("just inserted"))
    }

    /// Transition a call to `RUNNING`.
    pub fn mark_running(&mut self, call_id: &str) -> Result<()> {
        self.transition(call_id, CallStatus::Running)
    }

    /// Handle `TOOL_CANCEL`: transition to `CANCELLING` if not already
    /// terminal (cancelling a `QUEUED` call completes it immediately per
    /// spec §4.6, since no `RUNNING` was ever observed).
    pub fn request_cancel(&mut self, call_id: &str) -> Result<CallStatus> {
        let call = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| HaipError::ToolNotFound(call_id.to_string()))?;
        if call.status.is_terminal() {
            return Ok(call.status);
        }
        if call.status == CallStatus::Queued {
            call.status = CallStatus::Cancelled;
        } else {
            call.status = CallStatus::Cancelling;
        }
        Ok(call.status)
    }

    /// Handle `TOOL_DONE`: record the terminal status and remove the call
    /// from active tracking.
    pub fn finish_call(&mut self, call_id: &str, status: CallStatus) -> Result<ToolCall> {
        if !status.is_terminal() {
            return Err(HaipError::ProtocolViolation {
                field: "status".to_string(),
            });
        }
        let mut call = self
            .calls
            .remove(call_id)
            .ok_or_else(|| HaipError::ToolNotFound(call_id.to_string()))?;
        call.status = status;
        Ok(call)
    }

    /// Look up a call's current state.
    pub fn get(&self, call_id: &str) -> Option<&ToolCall> {
        self.calls.get(call_id)
    }

    /// All call ids currently bound to `run_id`, for advisory cancellation
    /// when a run is cancelled (spec §4.5).
    pub fn calls_for_run(&self, run_id: &str) -> Vec<String> {
        self.calls
            .values()
            .filter(|c| c.run_id.as_deref() == Some(run_id))
            .map(|c| c.call_id.clone())
            .collect()
    }

    fn transition(&mut self, call_id: &str, status: CallStatus) -> Result<()> {
        let call = self
            .calls
            .get_mut(call_id)
            .ok_or_else(|| HaipError::ToolNotFound(call_id.to_string()))?;
        call.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "echo".to_string(),
            description: "echoes its input".to_string(),
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn unknown_tool_is_rejected_without_queuing() {
        let mut mgr = ToolManager::new();
        let err = mgr
            .start_call("c1".into(), "missing".into(), None, &json!({}))
            .unwrap_err();
        assert_eq!(err.code(), "TOOL_NOT_FOUND");
        assert!(mgr.get("c1").is_none());
    }

    #[test]
    fn schema_violation_is_rejected_without_queuing() {
        let mut mgr = ToolManager::new();
        mgr.register(
            ToolDescriptor {
                name: "echo".to_string(),
                description: "echoes its input".to_string(),
                input_schema: json!({"type": "object", "required": ["text"]}),
                output_schema: json!({"type": "object"}),
            },
            None,
        );
        let err = mgr
            .start_call("c1".into(), "echo".into(), None, &json!({}))
            .unwrap_err();
        assert_eq!(err.code(), "TOOL_SCHEMA_VIOLATION");
        assert!(mgr.get("c1").is_none());
    }

    #[test]
    fn full_lifecycle_queued_running_completed() {
        let mut mgr = ToolManager::new();
        mgr.register(sample_descriptor(), None);
        mgr.start_call("c1".into(), "echo".into(), Some("r1".into()), &json!({}))
            .unwrap();
        assert_eq!(mgr.get("c1").unwrap().status, CallStatus::Queued);

        mgr.mark_running("c1").unwrap();
        assert_eq!(mgr.get("c1").unwrap().status, CallStatus::Running);

        let done = mgr.finish_call("c1", CallStatus::Ok).unwrap();
        assert_eq!(done.status, CallStatus::Ok);
        assert!(mgr.get("c1").is_none());
    }

    #[test]
    fn cancel_while_queued_completes_immediately() {
        let mut mgr = ToolManager::new();
        mgr.register(sample_descriptor(), None);
        mgr.start_call("c1".into(), "echo".into(), None, &json!({}))
            .unwrap();
        let status = mgr.request_cancel("c1").unwrap();
        assert_eq!(status, CallStatus::Cancelled);
    }

    #[test]
    fn cancel_while_running_goes_through_cancelling() {
        let mut mgr = ToolManager::new();
        mgr.register(sample_descriptor(), None);
        mgr.start_call("c1".into(), "echo".into(), None, &json!({}))
            .unwrap();
        mgr.mark_running("c1").unwrap();
        let status = mgr.request_cancel("c1").unwrap();
        assert_eq!(status, CallStatus::Cancelling);
        let done = mgr.finish_call("c1", CallStatus::Cancelled).unwrap();
        assert_eq!(done.status, CallStatus::Cancelled);
    }

    #[test]
    fn finish_call_rejects_non_terminal_status() {
        let mut mgr = ToolManager::new();
        mgr.register(sample_descriptor(), None);
        mgr.start_call("c1".into(), "echo".into(), None, &json!({}))
            .unwrap();
        let err = mgr.finish_call("c1", CallStatus::Running).unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_VIOLATION");
    }

    #[test]
    fn calls_for_run_filters_by_run_id() {
        let mut mgr = ToolManager::new();
        mgr.register(sample_descriptor(), None);
        mgr.start_call("c1".into(), "echo".into(), Some("r1".into()), &json!({}))
            .unwrap();
        mgr.start_call("c2".into(), "echo".into(), Some("r2".into()), &json!({}))
            .unwrap();
        assert_eq!(mgr.calls_for_run("r1"), vec!["c1".to_string()]);
    }

    #[test]
    fn tool_list_and_schema_reflect_registry() {
        let mut mgr = ToolManager::new();
        mgr.register(sample_descriptor(), None);
        let list = mgr.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].0, "echo");
        assert!(mgr.schema("echo").is_ok());
        assert!(mgr.schema("missing").is_err());
    }
}
