pub mod config;
pub mod confluence;
pub mod snapshot;

pub use config::ScorerConfig;
pub use confluence::{Bias, ConfluenceScorer};
pub use snapshot::{Candle, IndicatorSnapshot, Indicators, Timeframe, TimeframeSnapshot};

use common::Signal;

/// Turns an indicator snapshot into a tiered signal.
///
/// Implementations must be pure: same snapshot, same signal, no I/O. Input
/// problems come back as NO_TRADE with a reason, never as a panic or error.
pub trait Scorer: Send + Sync {
    fn evaluate(&self, snapshot: &IndicatorSnapshot) -> Signal;
}
