use chrono::{DateTime, Utc};
use conductor_types::TraceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of replay-log events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEventType {
    StateTransition,
    AgentDecision,
    ToolCallStart,
    ToolCallEnd,
    PolicyEvaluation,
    SnapshotCreated,
    SnapshotRestored,
    HumanInteraction,
    ErrorOccurred,
}

impl std::fmt::Display for TraceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TraceEventType::StateTransition => "STATE_TRANSITION",
            TraceEventType::AgentDecision => "AGENT_DECISION",
            TraceEventType::ToolCallStart => "TOOL_CALL_START",
            TraceEventType::ToolCallEnd => "TOOL_CALL_END",
            TraceEventType::PolicyEvaluation => "POLICY_EVALUATION",
            TraceEventType::SnapshotCreated => "SNAPSHOT_CREATED",
            TraceEventType::SnapshotRestored => "SNAPSHOT_RESTORED",
            TraceEventType::HumanInteraction => "HUMAN_INTERACTION",
            TraceEventType::ErrorOccurred => "ERROR_OCCURRED",
        };
        f.write_str(name)
    }
}

/// One entry of the replay log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: TraceEventType,
    pub payload: Value,
    pub trace_id: TraceId,
}

impl TraceEvent {
    pub fn new(event_type: TraceEventType, payload: Value, trace_id: TraceId) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            payload,
            trace_id,
        }
    }
}
