//! Property tests for batch preparation over random DAGs.

use conductor_scheduler::{SchedulerConfig, StepScheduler};
use conductor_types::{
    codes, ExecutionContext, ExecutionPlan, PlanStep, StepStatus, StructuredError,
};
use proptest::prelude::*;

/// Random DAG: step i may only depend on steps with a smaller index.
fn arb_plan() -> impl Strategy<Value = ExecutionPlan> {
    (1usize..12).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), n)
            .prop_map(move |deps| {
                let mut plan = ExecutionPlan::new("random");
                for (i, picks) in deps.into_iter().enumerate() {
                    let mut step = PlanStep::new(format!("s{}", i), "t");
                    if i > 0 {
                        let mut chosen: Vec<usize> = picks.iter().map(|p| p.index(i)).collect();
                        chosen.sort_unstable();
                        chosen.dedup();
                        for d in chosen {
                            step = step.depends_on(format!("s{}", d));
                        }
                    }
                    plan = plan.with_step(step);
                }
                plan
            })
    })
}

proptest! {
    #[test]
    fn nothing_dispatched_before_its_dependencies(
        plan in arb_plan(),
        failures in prop::collection::vec(0u8..4, 12),
    ) {
        let scheduler = StepScheduler::new(SchedulerConfig::default());
        let mut ctx = ExecutionContext::new();
        ctx.install_plan(plan.clone());

        // 0 = fails permanently, 1 = fails retryably forever, else succeeds.
        let fate = |id: &str| -> u8 {
            let i: usize = id[1..].parse().unwrap();
            failures[i]
        };

        for _round in 0..100 {
            let batch = scheduler.prepare_batch(&mut ctx);
            if batch.is_empty() {
                break;
            }
            for id in &batch {
                let step = plan.step(id).unwrap();
                if ctx.status(id) == Some(StepStatus::Pending) {
                    for dep in &step.dependencies {
                        prop_assert_eq!(ctx.status(dep), Some(StepStatus::Completed));
                    }
                }
            }
            for id in &batch {
                *ctx.step_attempts.entry(id.clone()).or_insert(0) += 1;
                match fate(id) {
                    0 => {
                        ctx.active_steps.insert(id.clone(), StepStatus::Failed);
                        ctx.errors.push(
                            StructuredError::warning(codes::TOOL_FAILED, "no")
                                .with_metadata("step_id", id.as_str()),
                        );
                    }
                    1 => {
                        ctx.active_steps.insert(id.clone(), StepStatus::Failed);
                        ctx.errors.push(
                            StructuredError::warning(codes::STEP_TIMEOUT, "slow")
                                .retryable(true)
                                .with_metadata("step_id", id.as_str()),
                        );
                    }
                    _ => {
                        ctx.active_steps.insert(id.clone(), StepStatus::Completed);
                    }
                }
            }
        }

        // Everything settles: no step is left PENDING or RUNNING.
        for step in &plan.steps {
            let status = ctx.status(&step.id).unwrap();
            prop_assert!(status.is_terminal(), "{} left {:?}", step.id, status);
            if status == StepStatus::Skipped {
                let dead_upstream = step.dependencies.iter().any(|d| {
                    matches!(ctx.status(d), Some(StepStatus::Failed) | Some(StepStatus::Skipped))
                });
                prop_assert!(dead_upstream);
            }
            if status == StepStatus::Completed {
                for dep in &step.dependencies {
                    prop_assert_eq!(ctx.status(dep), Some(StepStatus::Completed));
                }
            }
        }
    }
}
