//! Agent registry: name-keyed, role-searchable
//!
//! Names are unique. Role lookup returns the first agent registered
//! for the role, so registration order matters when several agents
//! share a role.

use crate::error::{RegistryError, RegistryResult};
use crate::traits::Agent;
use conductor_types::AgentRole;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Registry of cognitive agents
#[derive(Clone, Default)]
pub struct AgentRegistry {
    /// Agents in registration order
    agents: Vec<Arc<dyn Agent>>,
    /// Index by name → position in `agents`
    by_name: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Fails if the name is already taken.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> RegistryResult<()> {
        let name = agent.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        tracing::debug!(agent = %name, role = %agent.role(), "Agent registered");
        self.by_name.insert(name, self.agents.len());
        self.agents.push(agent);
        Ok(())
    }

    pub fn get(&self, name: &str) -> RegistryResult<Arc<dyn Agent>> {
        self.by_name
            .get(name)
            .map(|idx| Arc::clone(&self.agents[*idx]))
            .ok_or_else(|| RegistryError::AgentNotFound(name.to_string()))
    }

    /// First agent registered for `role`.
    pub fn get_by_role(&self, role: AgentRole) -> RegistryResult<Arc<dyn Agent>> {
        self.agents
            .iter()
            .find(|a| a.role() == role)
            .cloned()
            .ok_or(RegistryError::RoleNotFound(role))
    }

    /// Name → role for every registered agent.
    pub fn list_agents(&self) -> BTreeMap<String, AgentRole> {
        self.agents
            .iter()
            .map(|a| (a.name().to_string(), a.role()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.list_agents())
            .finish()
    }
}
