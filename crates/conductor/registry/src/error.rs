use conductor_types::AgentRole;
use thiserror::Error;

/// Registry lookup and registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("agent already registered: {0}")]
    DuplicateName(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("no agent registered for role {0}")]
    RoleNotFound(AgentRole),

    #[error("tool not found: {0}")]
    ToolNotFound(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
