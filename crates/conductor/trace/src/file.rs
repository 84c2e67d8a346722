//! JSON-lines tracer with append-only writes

use crate::error::TraceResult;
use crate::event::{TraceEvent, TraceEventType};
use crate::Tracer;
use async_trait::async_trait;
use conductor_types::TraceId;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Tracer that appends one event per line to a file.
pub struct JsonlTracer {
    path: PathBuf,
    /// Serializes appends so concurrent writers never interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlTracer {
    pub async fn new(path: impl Into<PathBuf>) -> TraceResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every event in the file, all traces.
    pub async fn read_all(&self) -> TraceResult<Vec<TraceEvent>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl Tracer for JsonlTracer {
    async fn record_event(
        &self,
        event_type: TraceEventType,
        payload: Value,
        trace_id: &TraceId,
    ) -> TraceResult<()> {
        let event = TraceEvent::new(event_type, payload, trace_id.clone());
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(trace_id = %trace_id, event = %event_type, "Trace event appended");
        Ok(())
    }

    async fn get_trace(&self, trace_id: &TraceId) -> TraceResult<Vec<TraceEvent>> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| &e.trace_id == trace_id)
            .collect())
    }
}
