//! Per-request time budget shared by every pipeline stage.
use std::time::{Duration, Instant};

use crate::error::PipelineError;

/// Absolute deadline for one request. `None` budget means unbounded, in which
/// case each stage still applies its own per-call timeout.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn start(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.budget
            .map(|budget| budget.saturating_sub(self.started.elapsed()))
    }

    /// Timeout to hand to a collaborator call: the smaller of the stage limit
    /// and whatever is left of the request budget.
    pub fn clamp(&self, stage_limit: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => stage_limit.min(remaining),
            None => stage_limit,
        }
    }

    /// Fail fast before starting `stage` when the budget is already spent.
    pub fn check(&self, stage: &'static str) -> Result<(), PipelineError> {
        match (self.budget, self.remaining()) {
            (Some(budget), Some(remaining)) if remaining.is_zero() => {
                Err(PipelineError::DeadlineExceeded { stage, budget })
            }
            _ => Ok(()),
        }
    }
}
