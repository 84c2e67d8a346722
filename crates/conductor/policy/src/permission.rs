//! Tool permission levels against caller roles.

use crate::config::PolicyConfig;
use conductor_types::{AgentRole, PermissionLevel};
use serde::{Deserialize, Serialize};

/// Outcome of a tool permission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionCheck {
    Allowed,
    Denied,
    /// Only a human may approve the call.
    RequiresApproval,
}

impl PermissionCheck {
    pub fn is_allowed(&self) -> bool {
        *self == PermissionCheck::Allowed
    }
}

/// PUBLIC is open to every role, INTERNAL only to trusted roles, and
/// ADMIN always needs human approval whatever the role.
pub fn check_tool_permission(
    config: &PolicyConfig,
    role: AgentRole,
    level: PermissionLevel,
) -> PermissionCheck {
    match level {
        PermissionLevel::Public => PermissionCheck::Allowed,
        PermissionLevel::Internal if config.is_trusted(role) => PermissionCheck::Allowed,
        PermissionLevel::Internal => PermissionCheck::Denied,
        PermissionLevel::Admin => PermissionCheck::RequiresApproval,
    }
}
