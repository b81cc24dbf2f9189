//! Strategy executors: how the tasks of one plan stage are evaluated.
//!
//! Tasks share nothing mutable (each reads the same immutable source
//! and metadata), so running them on a thread pool is safe. Either way
//! outcomes come back in task order, never completion order.

use std::time::Duration;

use rayon::prelude::*;

use crate::element::{StrategyKind, StrategyOutput};
use crate::types::StrategyError;

/// What one strategy task produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRun {
    pub strategy: StrategyKind,
    pub outcome: Result<StrategyOutput, StrategyError>,
    pub elapsed: Duration,
}

/// One strategy invocation, ready to run.
pub type StrategyTask<'a> = Box<dyn FnOnce() -> StrategyRun + Send + 'a>;

/// Capability to evaluate a batch of strategy tasks.
pub trait StrategyExecutor: std::fmt::Debug + Send + Sync {
    /// Run every task; the result at index `i` belongs to task `i`.
    fn execute<'a>(&self, tasks: Vec<StrategyTask<'a>>) -> Vec<StrategyRun>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Runs tasks one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl StrategyExecutor for SequentialExecutor {
    fn execute<'a>(&self, tasks: Vec<StrategyTask<'a>>) -> Vec<StrategyRun> {
        tasks.into_iter().map(|task| task()).collect()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Runs tasks concurrently on the global rayon pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelExecutor;

impl StrategyExecutor for ParallelExecutor {
    fn execute<'a>(&self, tasks: Vec<StrategyTask<'a>>) -> Vec<StrategyRun> {
        if tasks.len() <= 1 {
            return SequentialExecutor.execute(tasks);
        }
        tasks.into_par_iter().map(|task| task()).collect()
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}
