//! CPU-time accounting.
//!
//! Budgets are defined in CPU seconds of the grading process tree: work done
//! on our own threads shows up in `RUSAGE_SELF`, candidates, compilers, linters
//! and engine children in `RUSAGE_CHILDREN` once they have been reaped.

use std::time::Duration;

use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::time::{TimeVal, TimeValLike};

use crate::sandbox::SandboxError;

fn to_duration(t: TimeVal) -> Duration {
    Duration::from_micros(t.num_microseconds().max(0) as u64)
}

fn cpu_time(who: UsageWho) -> Result<Duration, SandboxError> {
    let usage = getrusage(who).map_err(SandboxError::Clock)?;
    Ok(to_duration(usage.user_time()) + to_duration(usage.system_time()))
}

/// User plus system time of all reaped children.
pub fn children_cpu_time() -> Result<Duration, SandboxError> {
    cpu_time(UsageWho::RUSAGE_CHILDREN)
}

/// User plus system time of this process.
pub fn self_cpu_time() -> Result<Duration, SandboxError> {
    cpu_time(UsageWho::RUSAGE_SELF)
}

pub fn process_tree_cpu_time() -> Result<Duration, SandboxError> {
    Ok(self_cpu_time()? + children_cpu_time()?)
}

/// The CPU-second budget shared by all tests of one submission.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    total: Duration,
    started_at: Duration,
}

impl TimeBudget {
    pub fn start(total: Duration) -> Result<Self, SandboxError> {
        Ok(Self {
            total,
            started_at: process_tree_cpu_time()?,
        })
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn used(&self) -> Result<Duration, SandboxError> {
        Ok(process_tree_cpu_time()?.saturating_sub(self.started_at))
    }

    /// Zero once the budget is spent, never negative.
    pub fn remaining(&self) -> Result<Duration, SandboxError> {
        Ok(self.total.saturating_sub(self.used()?))
    }
}
