//! The lifecycle transition table and decision routing.
//!
//! The table is the only source of legal edges. Anything routed outside
//! it is replaced by FAILED.

use conductor_types::{LifecycleState, PolicyDecision};
use LifecycleState::*;

/// Legal targets from `from`.
pub fn allowed_targets(from: LifecycleState) -> &'static [LifecycleState] {
    match from {
        Init => &[ContextBuild, Failed],
        ContextBuild => &[PlanGeneration, Replan, WaitHuman, Rollback, Failed],
        PlanGeneration => &[PlanCheck, Replan, WaitHuman, Rollback, Failed],
        PlanCheck => &[ExecutionPrepare, Replan, WaitHuman, Rollback, Failed],
        ExecutionPrepare => &[StepExecution, GlobalReview, Replan, WaitHuman, Rollback, Failed],
        StepExecution => &[StepReview, Replan, WaitHuman, Rollback, Failed],
        StepReview => &[
            ExecutionPrepare,
            StepExecution,
            GlobalReview,
            Replan,
            WaitHuman,
            Rollback,
            Failed,
        ],
        GlobalReview => &[Completed, ExecutionPrepare, Replan, WaitHuman, Rollback, Failed],
        Replan => &[PlanGeneration, Failed],
        // STEP_EXECUTION and PLAN_GENERATION via feedback, ROLLBACK via an
        // operator rollback, FAILED on wait timeout.
        WaitHuman => &[PlanGeneration, StepExecution, Rollback, Failed],
        Rollback => &[PlanGeneration, ExecutionPrepare, StepExecution, GlobalReview, Failed],
        Completed | Failed => &[],
    }
}

pub fn is_allowed(from: LifecycleState, to: LifecycleState) -> bool {
    allowed_targets(from).contains(&to)
}

/// Turn a policy decision and the handler's proposal into a target.
///
/// An explicit `next_state` beats the human-approval flag on a denial;
/// a denied proposal is never taken.
pub fn route(decision: &PolicyDecision, proposal: LifecycleState) -> LifecycleState {
    if decision.allow {
        if decision.require_human_approval {
            WaitHuman
        } else {
            decision.next_state.unwrap_or(proposal)
        }
    } else if let Some(next) = decision.next_state {
        next
    } else if decision.require_human_approval {
        WaitHuman
    } else {
        Failed
    }
}

/// Where human feedback resumes, given the state that requested the wait.
pub fn resume_after_wait(origin: LifecycleState) -> LifecycleState {
    match origin {
        ExecutionPrepare | StepExecution | StepReview => StepExecution,
        _ => PlanGeneration,
    }
}

/// States whose entry is checkpointed, unless entered from ROLLBACK.
pub fn takes_snapshot(from: LifecycleState, to: LifecycleState) -> bool {
    from != Rollback && matches!(to, PlanGeneration | StepExecution | GlobalReview)
}
