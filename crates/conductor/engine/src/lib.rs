//! Conductor engine
//!
//! A policy-gated lifecycle state machine for multi-agent task execution.
//! One [`Engine`] governs one task: it builds context, asks a planner for
//! an [`ExecutionPlan`](conductor_types::ExecutionPlan), checks it, runs
//! its steps in dependency-ordered parallel batches, reviews the results
//! and either completes, replans, rolls back to a snapshot or pauses for
//! a human.
//!
//! Every proposed transition passes the [`Policy`](conductor_policy::Policy)
//! gate first, and only edges in the transition table
//! ([`lifecycle::allowed_targets`]) are ever taken.
//!
//! ```no_run
//! # use conductor_engine::{Engine, EngineConfig};
//! # async fn demo() -> conductor_engine::Result<()> {
//! let mut engine = Engine::new(EngineConfig::default());
//! // register agents and tools, then:
//! let result = engine.start("summarise the quarterly report").await?;
//! if result.awaiting_human() {
//!     engine.submit_human_feedback("approve").await?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
mod handlers;
pub mod lifecycle;
pub mod rollback;

pub use self::config::{EngineConfig, LoggingConfig, SnapshotConfig};
pub use self::engine::{Engine, EngineBuilder};
pub use self::error::{EngineError, Result};
pub use self::rollback::RollbackHandle;
