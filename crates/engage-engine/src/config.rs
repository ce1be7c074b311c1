use crate::error::{EngineError, Result};
use chrono::Duration;
use engage_ledger::CoinAmount;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Coins debited from the owner per requested interaction.
    pub unit_cost: CoinAmount,
    /// Coins credited to a worker per verified task.
    pub reward_amount: CoinAmount,
    /// Seconds a claimed task stays assigned before it may be released.
    pub assignment_window_secs: i64,
    /// Attempts before a retryable validation failure becomes terminal.
    pub max_retries: u32,
    /// Upper bound on the candidate set surfaced to the assignment policy.
    pub max_candidates_per_take: usize,
    /// Replace a worker-fault rejection with a fresh pending task, keeping
    /// the order's target count intact. With this off the order shrinks.
    pub replace_on_worker_fault: bool,
    /// Bounded internal retries when a claim race is lost.
    pub claim_retry_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_cost: CoinAmount::from_coins(10),
            reward_amount: CoinAmount::from_coins(8),
            assignment_window_secs: 3600,
            max_retries: 3,
            max_candidates_per_take: 16,
            replace_on_worker_fault: true,
            claim_retry_limit: 3,
        }
    }
}

impl EngineConfig {
    pub fn assignment_window(&self) -> Duration {
        Duration::seconds(self.assignment_window_secs)
    }

    /// Platform margin must be non-negative: `unit_cost ≥ reward_amount`.
    pub fn validate(&self) -> Result<()> {
        if self.unit_cost < self.reward_amount {
            return Err(EngineError::InvalidParameter(format!(
                "unit_cost ({}) must be at least reward_amount ({})",
                self.unit_cost, self.reward_amount
            )));
        }
        if self.unit_cost == CoinAmount::ZERO {
            return Err(EngineError::InvalidParameter(
                "unit_cost must be positive".to_string(),
            ));
        }
        if self.assignment_window_secs <= 0 {
            return Err(EngineError::InvalidParameter(
                "assignment_window_secs must be positive".to_string(),
            ));
        }
        if self.max_candidates_per_take == 0 {
            return Err(EngineError::InvalidParameter(
                "max_candidates_per_take must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
