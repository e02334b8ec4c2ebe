use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which side wins when one tick crosses both a target and the stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    StopLossFirst,
    TakeProfitFirst,
}

/// Where the stop sits once TP1 has been hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAfterTp1 {
    /// Keep the original stop-loss.
    #[default]
    Original,
    /// Move the stop to the entry price.
    Breakeven,
}

/// Trade lifecycle settings (`[lifecycle]` in the settings file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Lifetime of a per-trade lock before it counts as abandoned.
    pub lock_ttl_ms: u64,
    /// Longest a caller waits for a held lock before giving up.
    pub lock_wait_ms: u64,
    pub lock_poll_ms: u64,
    pub tie_break: TieBreak,
    pub stop_after_tp1: StopAfterTp1,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 5_000,
            lock_wait_ms: 250,
            lock_poll_ms: 20,
            tie_break: TieBreak::default(),
            stop_after_tp1: StopAfterTp1::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms.max(1))
    }
}
