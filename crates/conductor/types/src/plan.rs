//! Execution plans: an ordered list of steps forming a dependency DAG

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Structural plan defects found by [`ExecutionPlan::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("step {0} depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle through step {0}")]
    Cycle(String),

    #[error("step {step} references unknown tool {tool}")]
    UnknownTool { step: String, tool: String },
}

pub type PlanResult<T> = Result<T, PlanError>;

/// One unit of work: a single tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub tool_name: String,
    /// Tool input for this step.
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<Value>,
    /// Steps that must be COMPLETED before this one is dispatched.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            tool_name: tool_name.into(),
            input_schema: Value::Null,
            expected_output: None,
            dependencies: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input_schema = input;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// The planner's output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    /// Check ids, dependency references and acyclicity.
    pub fn validate(&self) -> PlanResult<()> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(PlanError::DuplicateStep(step.id.clone()));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(PlanError::SelfDependency(step.id.clone()));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// [`validate`](Self::validate) plus a tool lookup for every step.
    pub fn validate_with_tools(&self, tool_exists: impl Fn(&str) -> bool) -> PlanResult<()> {
        self.validate()?;
        for step in &self.steps {
            if !tool_exists(&step.tool_name) {
                return Err(PlanError::UnknownTool {
                    step: step.id.clone(),
                    tool: step.tool_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Kahn's algorithm, ties broken by plan order.
    pub fn topological_order(&self) -> PlanResult<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.dependencies.len()))
            .collect();

        let mut order = Vec::with_capacity(self.steps.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while order.len() < self.steps.len() {
            let next = self
                .steps
                .iter()
                .find(|s| !placed.contains(s.id.as_str()) && in_degree[s.id.as_str()] == 0);

            let Some(step) = next else {
                let stuck = self
                    .steps
                    .iter()
                    .find(|s| !placed.contains(s.id.as_str()))
                    .map(|s| s.id.clone())
                    .unwrap_or_default();
                return Err(PlanError::Cycle(stuck));
            };

            placed.insert(step.id.as_str());
            order.push(step.id.clone());
            for other in &self.steps {
                let hits = other.dependencies.iter().filter(|d| *d == &step.id).count();
                if hits > 0 {
                    if let Some(degree) = in_degree.get_mut(other.id.as_str()) {
                        *degree = degree.saturating_sub(hits);
                    }
                }
            }
        }

        Ok(order)
    }
}
