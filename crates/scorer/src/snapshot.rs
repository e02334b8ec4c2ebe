use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Analysis timeframes, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "5m")]
    M5,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::Daily,
        Timeframe::H4,
        Timeframe::H1,
        Timeframe::M15,
        Timeframe::M5,
    ];

    /// Contribution of an aligned bias to the confluence sum (max total 8).
    pub fn weight(self) -> f64 {
        match self {
            Timeframe::Daily | Timeframe::H4 | Timeframe::H1 => 2.0,
            Timeframe::M15 | Timeframe::M5 => 1.0,
        }
    }

    pub fn is_higher(self) -> bool {
        matches!(self, Timeframe::Daily | Timeframe::H4)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::Daily => "1d",
            Timeframe::H4 => "4h",
            Timeframe::H1 => "1h",
            Timeframe::M15 => "15m",
            Timeframe::M5 => "5m",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Indicator values computed upstream. `None` (JSON `null`) and non-finite
/// values both mean "unavailable"; neither is ever read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Indicators {
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub rsi: Option<f64>,
    pub adx: Option<f64>,
    pub atr: Option<f64>,
}

impl Indicators {
    pub fn ema20(&self) -> Option<f64> {
        available(self.ema20)
    }

    pub fn ema50(&self) -> Option<f64> {
        available(self.ema50)
    }

    pub fn rsi(&self) -> Option<f64> {
        available(self.rsi)
    }

    pub fn adx(&self) -> Option<f64> {
        available(self.adx)
    }

    pub fn atr(&self) -> Option<f64> {
        available(self.atr)
    }
}

fn available(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSnapshot {
    pub timeframe: Timeframe,
    /// Oldest first.
    #[serde(default)]
    pub candles: Vec<Candle>,
    #[serde(default)]
    pub indicators: Indicators,
}

impl TimeframeSnapshot {
    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close).filter(|c| c.is_finite())
    }

    /// Why this timeframe cannot be used, if it cannot.
    pub fn defect(&self, min_candles: usize) -> Option<String> {
        if self.candles.len() < min_candles {
            return Some(format!(
                "{}: {} candles, need {min_candles}",
                self.timeframe,
                self.candles.len()
            ));
        }
        if self.candles.iter().any(|c| !c.is_finite()) {
            return Some(format!("{}: non-finite candle values", self.timeframe));
        }
        if self
            .candles
            .windows(2)
            .any(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Some(format!("{}: candle timestamps not increasing", self.timeframe));
        }
        let ind = &self.indicators;
        let missing: Vec<&str> = [
            ("ema20", ind.ema20()),
            ("ema50", ind.ema50()),
            ("rsi", ind.rsi()),
        ]
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(name, _)| *name)
        .collect();
        if !missing.is_empty() {
            return Some(format!("{}: {} unavailable", self.timeframe, missing.join(", ")));
        }
        None
    }
}

/// Everything the scorer sees for one symbol at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub timeframes: Vec<TimeframeSnapshot>,
}

impl IndicatorSnapshot {
    /// First entry for `tf`; duplicates after it are ignored.
    pub fn timeframe(&self, tf: Timeframe) -> Option<&TimeframeSnapshot> {
        self.timeframes.iter().find(|t| t.timeframe == tf)
    }
}
