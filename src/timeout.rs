//! Wall-clock budget enforcement for long-running loops.
//!
//! The analysis pipeline is synchronous with no suspend points, so the
//! time budget is enforced by periodic checks inside the search loop
//! rather than by task cancellation.

use crate::error::{AnalyzerError, Result};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Default analysis budget in seconds
pub const DEFAULT_BUDGET_SECONDS: u64 = 300;

/// Synchronous timeout check for loop iterations.
pub struct IterationTimeout {
    start: Instant,
    max_duration: Duration,
    check_interval: usize,
    iteration_count: usize,
    operation_name: String,
}

impl IterationTimeout {
    /// Create a new iteration timeout checker
    pub fn new(budget: Duration, operation: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            max_duration: budget,
            check_interval: 1024, // check elapsed time every 1024 iterations
            iteration_count: 0,
            operation_name: operation.into(),
        }
    }

    /// Set the check interval (how often to check for timeout)
    pub fn with_check_interval(mut self, interval: usize) -> Self {
        self.check_interval = interval.max(1);
        self
    }

    /// Check if the budget has been exceeded.
    /// Should be called once per loop iteration.
    pub fn check(&mut self) -> Result<()> {
        self.iteration_count += 1;

        // Only consult the clock every N iterations for performance
        if self.iteration_count % self.check_interval == 0 {
            let elapsed = self.start.elapsed();

            if elapsed > self.max_duration {
                error!(
                    "Operation '{}' timed out after {} iterations and {:?}",
                    self.operation_name, self.iteration_count, elapsed
                );
                return Err(AnalyzerError::Timeout {
                    seconds: elapsed.as_secs(),
                });
            }

            if elapsed.as_secs() > 30 && self.iteration_count % (self.check_interval * 16) == 0 {
                warn!(
                    "Operation '{}' still running after {} iterations ({:?})",
                    self.operation_name, self.iteration_count, elapsed
                );
            }
        }

        Ok(())
    }

    /// Number of iterations processed so far
    pub fn iterations(&self) -> usize {
        self.iteration_count
    }

    /// Elapsed time since creation
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
