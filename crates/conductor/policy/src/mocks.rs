//! Policy doubles for engine tests.

use crate::{DefaultPolicy, PermissionCheck, Policy, TransitionInput};
use conductor_registry::Tool;
use conductor_types::{AgentRole, LifecycleState, PolicyDecision};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns fixed decisions for configured states and defers to
/// [`DefaultPolicy`] otherwise.
#[derive(Default)]
pub struct ScriptedPolicy {
    overrides: HashMap<LifecycleState, (PolicyDecision, bool)>,
    fired: parking_lot::Mutex<Vec<LifecycleState>>,
    evaluations: AtomicUsize,
    fallback: DefaultPolicy,
}

impl ScriptedPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override only the first evaluation in `state`.
    pub fn once(mut self, state: LifecycleState, decision: PolicyDecision) -> Self {
        self.overrides.insert(state, (decision, true));
        self
    }

    /// Override every evaluation in `state`.
    pub fn always(mut self, state: LifecycleState, decision: PolicyDecision) -> Self {
        self.overrides.insert(state, (decision, false));
        self
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl Policy for ScriptedPolicy {
    fn evaluate_transition(&self, input: &TransitionInput<'_>) -> PolicyDecision {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let state = input.global.lifecycle_state();
        if let Some((decision, once)) = self.overrides.get(&state) {
            let mut fired = self.fired.lock();
            if !*once || !fired.contains(&state) {
                fired.push(state);
                return decision.clone();
            }
        }
        self.fallback.evaluate_transition(input)
    }

    fn check_tool_permission(&self, role: AgentRole, tool: &dyn Tool) -> PermissionCheck {
        self.fallback.check_tool_permission(role, tool)
    }
}
