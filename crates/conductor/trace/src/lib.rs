//! Replay log for conductor executions
//!
//! Every lifecycle transition, policy evaluation and snapshot operation
//! emits exactly one [`TraceEvent`] tagged with the task's trace id.
//! Reading a trace back yields the events in recording order, enough to
//! reconstruct the run.
//!
//! Two sinks ship with the crate:
//!
//! - [`MemoryTracer`] keeps events in process and mirrors them to `tracing`
//! - [`JsonlTracer`] appends one JSON object per line to a file

#![deny(unsafe_code)]

pub mod error;
pub mod event;
pub mod file;
pub mod memory;

pub use error::{TraceError, TraceResult};
pub use event::{TraceEvent, TraceEventType};
pub use file::JsonlTracer;
pub use memory::MemoryTracer;

use async_trait::async_trait;
use conductor_types::TraceId;
use serde_json::Value;

/// Sink for trace events.
#[async_trait]
pub trait Tracer: Send + Sync {
    async fn record_event(
        &self,
        event_type: TraceEventType,
        payload: Value,
        trace_id: &TraceId,
    ) -> TraceResult<()>;

    /// Events for `trace_id` in recording order; empty when unknown.
    async fn get_trace(&self, trace_id: &TraceId) -> TraceResult<Vec<TraceEvent>>;
}
