//! In-process tracer
//!
//! Groups events per trace id and mirrors each one to `tracing` so a
//! running engine can be followed from the log output alone.

use crate::error::TraceResult;
use crate::event::{TraceEvent, TraceEventType};
use crate::Tracer;
use async_trait::async_trait;
use conductor_types::TraceId;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// Tracer that keeps every event in memory.
#[derive(Default)]
pub struct MemoryTracer {
    events: RwLock<HashMap<TraceId, Vec<TraceEvent>>>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read, handy in tests.
    pub fn events(&self, trace_id: &TraceId) -> Vec<TraceEvent> {
        self.events.read().get(trace_id).cloned().unwrap_or_default()
    }

    /// Count of events of one type for a trace.
    pub fn count(&self, trace_id: &TraceId, event_type: TraceEventType) -> usize {
        self.events
            .read()
            .get(trace_id)
            .map(|events| events.iter().filter(|e| e.event_type == event_type).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl Tracer for MemoryTracer {
    async fn record_event(
        &self,
        event_type: TraceEventType,
        payload: Value,
        trace_id: &TraceId,
    ) -> TraceResult<()> {
        tracing::info!(
            trace_id = %trace_id,
            event = %event_type,
            payload = %payload,
            "Trace event"
        );
        let event = TraceEvent::new(event_type, payload, trace_id.clone());
        self.events
            .write()
            .entry(trace_id.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn get_trace(&self, trace_id: &TraceId) -> TraceResult<Vec<TraceEvent>> {
        Ok(self.events(trace_id))
    }
}
