//! Collaborator contracts for the conductor engine
//!
//! Cognitive agents and tools are external to the engine. This crate
//! fixes their capability set ([`Agent`], [`Tool`]) and provides the two
//! name-keyed registries the engine is handed at construction.
//!
//! Registries are plain values owned by one engine, never process-wide
//! singletons, so independent engines can share a process.

#![deny(unsafe_code)]

pub mod agents;
pub mod error;
pub mod mocks;
pub mod tools;
pub mod traits;

pub use agents::AgentRegistry;
pub use error::{RegistryError, RegistryResult};
pub use tools::ToolRegistry;
pub use traits::{Agent, Tool};
