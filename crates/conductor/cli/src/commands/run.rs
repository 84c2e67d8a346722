//! `conductor run`: drive a plan file through the engine

use crate::builtins;
use anyhow::Context;
use clap::Args;
use conductor_engine::{Engine, EngineConfig};
use conductor_types::{EngineResult, ExecutionPlan};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON execution plan to run
    #[arg(long)]
    pub plan: PathBuf,

    /// Task goal; defaults to the plan's goal
    #[arg(long)]
    pub goal: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "CONDUCTOR_CONFIG")]
    pub config: Option<String>,

    /// Feedback to submit if the task pauses for a human
    #[arg(long)]
    pub feedback: Option<String>,
}

pub async fn execute(args: RunArgs) -> anyhow::Result<EngineResult> {
    let config = EngineConfig::load(args.config.as_deref()).context("loading configuration")?;

    let raw = tokio::fs::read_to_string(&args.plan)
        .await
        .with_context(|| format!("reading plan {}", args.plan.display()))?;
    let plan: ExecutionPlan = serde_json::from_str(&raw)
        .with_context(|| format!("parsing plan {}", args.plan.display()))?;
    let goal = args.goal.unwrap_or_else(|| plan.goal.clone());

    let mut engine = Engine::from_config(config).await?;
    builtins::install(&mut engine, plan)?;

    let mut result = engine.start(goal).await?;
    if result.awaiting_human() {
        if let Some(feedback) = args.feedback {
            info!(feedback = %feedback, "Submitting feedback");
            result = engine.submit_human_feedback(feedback).await?;
        } else {
            info!("Task is waiting for human feedback; rerun with --feedback");
        }
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result)
}
