use std::collections::HashMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Per-instrument tuning shared by the scorer (gates, tiers, levels) and the
/// signal cache (cooldown, entry window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    pub symbol: String,
    /// Hard gate: no tier is granted below this trend strength.
    pub adx_minimum: f64,
    pub a_plus_adx: f64,
    pub a_adx: f64,
    pub b_adx: f64,
    pub a_plus_score: f64,
    pub a_score: f64,
    pub b_score: f64,
    /// Reference volatility. Scoring buckets are multiples of this value and
    /// the hard floor is `0.7 × min_atr`.
    pub min_atr: f64,
    pub stop_atr_multiple: f64,
    /// Target distances in multiples of the stop distance.
    pub tp1_rr: f64,
    pub tp2_rr: f64,
    pub cooldown_minutes: i64,
    pub entry_window_minutes: i64,
    /// Rounding step applied to prices before fingerprinting.
    pub price_step: f64,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            adx_minimum: 15.0,
            a_plus_adx: 23.5,
            a_adx: 19.0,
            b_adx: 15.0,
            a_plus_score: 7.5,
            a_score: 5.5,
            b_score: 4.0,
            min_atr: 0.35,
            stop_atr_multiple: 1.5,
            tp1_rr: 1.0,
            tp2_rr: 1.5,
            cooldown_minutes: 60,
            entry_window_minutes: 20,
            price_step: 0.1,
        }
    }
}

impl SymbolConfig {
    pub fn gold() -> Self {
        Self {
            symbol: "XAU_USD".into(),
            adx_minimum: 15.0,
            min_atr: 2.5,
            cooldown_minutes: 90,
            entry_window_minutes: 15,
            price_step: 10.0,
            ..Self::default()
        }
    }

    pub fn silver() -> Self {
        Self {
            symbol: "XAG_USD".into(),
            a_plus_adx: 21.0,
            a_adx: 17.0,
            min_atr: 0.35,
            cooldown_minutes: 60,
            entry_window_minutes: 20,
            price_step: 0.1,
            ..Self::default()
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::minutes(self.cooldown_minutes.max(0))
    }

    pub fn entry_window(&self) -> Duration {
        Duration::minutes(self.entry_window_minutes.max(0))
    }
}

/// Lookup of symbol tuning with a fallback profile for unlisted symbols.
#[derive(Debug, Clone)]
pub struct SymbolBook {
    symbols: HashMap<String, SymbolConfig>,
    fallback: SymbolConfig,
}

impl SymbolBook {
    pub fn new(configs: impl IntoIterator<Item = SymbolConfig>) -> Self {
        Self {
            symbols: configs.into_iter().map(|c| (c.symbol.clone(), c)).collect(),
            fallback: SymbolConfig::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: SymbolConfig) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn get(&self, symbol: &str) -> &SymbolConfig {
        self.symbols.get(symbol).unwrap_or(&self.fallback)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }
}

impl Default for SymbolBook {
    fn default() -> Self {
        Self::new([SymbolConfig::gold(), SymbolConfig::silver()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_symbol_uses_fallback() {
        let book = SymbolBook::default();
        assert_eq!(book.get("XAU_USD").cooldown_minutes, 90);
        assert_eq!(book.get("EUR_USD").cooldown_minutes, 60);
        assert_eq!(book.get("EUR_USD").symbol, "");
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let cfg: SymbolConfig =
            serde_json::from_str(r#"{"symbol":"NAS100USD","adx_minimum":8.0}"#).unwrap();
        assert_eq!(cfg.adx_minimum, 8.0);
        assert_eq!(cfg.tp2_rr, 1.5);
    }
}
