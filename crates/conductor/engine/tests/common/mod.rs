//! Shared fixtures for engine tests.

#![allow(dead_code)]

use conductor_engine::{Engine, EngineConfig};
use conductor_memory::Memory;
use conductor_policy::Policy;
use conductor_registry::mocks::ScriptedAgent;
use conductor_registry::Tool;
use conductor_trace::{MemoryTracer, TraceEvent, TraceEventType};
use conductor_types::{AgentRole, ExecutionPlan, LifecycleState, TraceId};
use serde_json::json;
use std::sync::Arc;

pub struct Harness {
    pub engine: Engine,
    pub tracer: Arc<MemoryTracer>,
}

impl Harness {
    pub fn trace_id(&self) -> TraceId {
        self.engine
            .global_state()
            .map(|g| g.trace_id().clone())
            .unwrap_or_else(|| TraceId::new("unstarted"))
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.tracer.events(&self.trace_id())
    }

    pub fn count(&self, event_type: TraceEventType) -> usize {
        self.tracer.count(&self.trace_id(), event_type)
    }

    /// `(from, to)` of every STATE_TRANSITION, in order.
    pub fn transitions(&self) -> Vec<(LifecycleState, LifecycleState)> {
        self.events()
            .iter()
            .filter(|e| e.event_type == TraceEventType::StateTransition)
            .map(|e| {
                let from = serde_json::from_value(e.payload["from"].clone()).unwrap();
                let to = serde_json::from_value(e.payload["to"].clone()).unwrap();
                (from, to)
            })
            .collect()
    }

    /// Position of the transition `from -> to` in the event list.
    pub fn position_of(&self, from: LifecycleState, to: LifecycleState) -> Option<usize> {
        self.events().iter().position(|e| {
            e.event_type == TraceEventType::StateTransition
                && e.payload["from"] == json!(from)
                && e.payload["to"] == json!(to)
        })
    }
}

pub struct HarnessBuilder {
    config: EngineConfig,
    plan: ExecutionPlan,
    tools: Vec<Arc<dyn Tool>>,
    critic: Option<ScriptedAgent>,
    reviewer: Option<ScriptedAgent>,
    policy: Option<Arc<dyn Policy>>,
    memory: Option<Arc<dyn Memory>>,
}

pub fn harness(plan: ExecutionPlan) -> HarnessBuilder {
    HarnessBuilder {
        config: EngineConfig::default(),
        plan,
        tools: Vec::new(),
        critic: None,
        reviewer: None,
        policy: None,
        memory: None,
    }
}

impl HarnessBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn critic(mut self, critic: ScriptedAgent) -> Self {
        self.critic = Some(critic);
        self
    }

    pub fn reviewer(mut self, reviewer: ScriptedAgent) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn build(self) -> Harness {
        let tracer = Arc::new(MemoryTracer::new());
        let mut builder = Engine::builder(self.config).tracer(tracer.clone());
        if let Some(policy) = self.policy {
            builder = builder.policy(policy);
        }
        if let Some(memory) = self.memory {
            builder = builder.memory(memory);
        }
        let mut engine = builder.build();

        engine
            .register_agent(Arc::new(ScriptedAgent::succeeding(
                "context",
                AgentRole::ContextBuilder,
                json!({"notes": "background"}),
            )))
            .unwrap();
        engine
            .register_agent(Arc::new(ScriptedAgent::planner("planner", &self.plan)))
            .unwrap();
        engine
            .register_agent(Arc::new(
                self.critic
                    .unwrap_or_else(|| ScriptedAgent::new("critic", AgentRole::PlanCritic)),
            ))
            .unwrap();
        engine
            .register_agent(Arc::new(
                self.reviewer
                    .unwrap_or_else(|| ScriptedAgent::new("reviewer", AgentRole::Reviewer)),
            ))
            .unwrap();
        for tool in self.tools {
            engine.register_tool(tool);
        }

        Harness { engine, tracer }
    }
}
