//! Convenience wrappers for the platform verbs.
//!
//! Methods are named `{service}.{verb}` on the wire; the gateway decides from
//! the service half which backends a request fans out to.

use serde_json::{Value, json};

use gridflow_wire::CallError;

use crate::client::GatewayClient;

impl GatewayClient {
    /// Fetch a graph definition.
    pub async fn load_graph(&self, graph_id: &str) -> Result<Value, CallError> {
        self.call("graph.load", json!({ "graphId": graph_id })).await
    }

    /// Start receiving change events for a graph.
    pub async fn subscribe_graph(&self, graph_id: &str) -> Result<Value, CallError> {
        self.call("graph.subscribe", json!({ "graphId": graph_id }))
            .await
    }

    pub async fn unsubscribe_graph(&self, graph_id: &str) -> Result<Value, CallError> {
        self.call("graph.unsubscribe", json!({ "graphId": graph_id }))
            .await
    }

    /// Apply an edit command to a graph. Cell edits travel as commands.
    pub async fn send_command(&self, graph_id: &str, command: Value) -> Result<Value, CallError> {
        self.call(
            "graph.command",
            json!({ "graphId": graph_id, "command": command }),
        )
        .await
    }

    /// Fetch a machine's current state.
    pub async fn load_machine(&self, machine_id: &str) -> Result<Value, CallError> {
        self.call("machine.load", json!({ "machineId": machine_id }))
            .await
    }

    pub async fn start_machine(&self, machine_id: &str) -> Result<Value, CallError> {
        self.call("machine.start", json!({ "machineId": machine_id }))
            .await
    }

    pub async fn stop_machine(&self, machine_id: &str) -> Result<Value, CallError> {
        self.call("machine.stop", json!({ "machineId": machine_id }))
            .await
    }

    pub async fn pause_machine(&self, machine_id: &str) -> Result<Value, CallError> {
        self.call("machine.pause", json!({ "machineId": machine_id }))
            .await
    }

    /// Advance a paused machine by a single step.
    pub async fn step_machine(&self, machine_id: &str) -> Result<Value, CallError> {
        self.call("machine.step", json!({ "machineId": machine_id }))
            .await
    }

    /// Start receiving step ticks for a machine.
    pub async fn subscribe_machine(&self, machine_id: &str) -> Result<Value, CallError> {
        self.call("machine.subscribe", json!({ "machineId": machine_id }))
            .await
    }

    pub async fn unsubscribe_machine(&self, machine_id: &str) -> Result<Value, CallError> {
        self.call("machine.unsubscribe", json!({ "machineId": machine_id }))
            .await
    }

    /// Acknowledge the step tick most recently consumed, so the machine
    /// service may emit the next one. Fire-and-forget.
    pub async fn confirm_processed_step(&self, machine_id: &str) -> Result<(), CallError> {
        self.send_uncorrelated("machine.confirm_step", json!({ "machineId": machine_id }))
            .await
    }
}
