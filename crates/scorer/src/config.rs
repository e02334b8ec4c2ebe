use serde::{Deserialize, Serialize};

use crate::snapshot::Timeframe;

/// Scorer-wide settings (`[scorer]` in the settings file).
///
/// ```toml
/// [scorer]
/// min_valid_timeframes = 3
/// min_candles = 50
/// anchor = "1h"
/// enable_b_tier = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Below this many usable timeframes the snapshot is refused outright.
    pub min_valid_timeframes: usize,
    /// Minimum candle history per timeframe.
    pub min_candles: usize,
    /// Timeframe supplying ADX, ATR and the entry price.
    pub anchor: Timeframe,
    pub enable_b_tier: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            min_valid_timeframes: 3,
            min_candles: 50,
            anchor: Timeframe::H1,
            enable_b_tier: true,
        }
    }
}
