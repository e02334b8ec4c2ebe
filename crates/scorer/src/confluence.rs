use std::collections::BTreeMap;

use tracing::{debug, error, info};

use common::fingerprint::setup_hash;
use common::{Criterion, Direction, EntryTier, Side, Signal, SymbolBook, SymbolConfig, Tier, TradeLevels};

use crate::config::ScorerConfig;
use crate::snapshot::{IndicatorSnapshot, Timeframe, TimeframeSnapshot};
use crate::Scorer;

/// Directional read of one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Long,
    Short,
    Neutral,
}

impl Bias {
    /// Trend plus momentum: price above a rising EMA stack with RSI over 50
    /// is LONG, the mirror image is SHORT, anything else is neutral.
    /// Callers only pass timeframes that passed validation.
    pub fn of(tf: &TimeframeSnapshot) -> Bias {
        let ind = &tf.indicators;
        let (Some(close), Some(ema20), Some(ema50), Some(rsi)) =
            (tf.last_close(), ind.ema20(), ind.ema50(), ind.rsi())
        else {
            return Bias::Neutral;
        };
        if close > ema20 && ema20 > ema50 && rsi > 50.0 {
            Bias::Long
        } else if close < ema20 && ema20 < ema50 && rsi < 50.0 {
            Bias::Short
        } else {
            Bias::Neutral
        }
    }

    pub fn agrees(self, side: Side) -> bool {
        matches!((self, side), (Bias::Long, Side::Long) | (Bias::Short, Side::Short))
    }

    pub fn opposes(self, side: Side) -> bool {
        self.agrees(side.opposite())
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bias::Long => write!(f, "LONG"),
            Bias::Short => write!(f, "SHORT"),
            Bias::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

// ─── Score buckets ────────────────────────────────────────────────────────────

/// Up to 4 points: half the winning side's weighted alignment (max 8).
pub fn alignment_points(aligned_weight: f64) -> f64 {
    (aligned_weight / 2.0).clamp(0.0, 4.0)
}

/// Up to 3 points for trend strength.
pub fn adx_points(adx: f64) -> f64 {
    if adx >= 25.0 {
        3.0
    } else if adx >= 20.0 {
        2.0
    } else if adx >= 18.0 {
        1.0
    } else {
        0.0
    }
}

/// Up to 3 points for volatility relative to the symbol's reference ATR.
pub fn atr_points(atr: f64, min_atr: f64) -> f64 {
    if min_atr <= 0.0 {
        return 0.0;
    }
    let ratio = atr / min_atr;
    if ratio >= 1.5 {
        3.0
    } else if ratio >= 1.0 {
        2.0
    } else if ratio >= 0.7 {
        1.0
    } else {
        0.0
    }
}

/// Fraction of `min_atr` below which volatility blocks any tier.
const ATR_FLOOR: f64 = 0.7;

// ─── Scorer ───────────────────────────────────────────────────────────────────

/// Multi-timeframe confluence scorer.
///
/// Pure: no I/O, no shared mutable state. Every hard-gate failure lands in
/// `blocked_reasons` and forces NO_TRADE whatever the numeric score.
#[derive(Debug, Clone)]
pub struct ConfluenceScorer {
    config: ScorerConfig,
    symbols: SymbolBook,
}

impl ConfluenceScorer {
    pub fn new(config: ScorerConfig, symbols: SymbolBook) -> Self {
        Self { config, symbols }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    fn refuse(
        &self,
        snapshot: &IndicatorSnapshot,
        profile: &SymbolConfig,
        score: f64,
        criteria: Vec<Criterion>,
        blocked: Vec<String>,
    ) -> Signal {
        debug!(symbol = %snapshot.symbol, score, reasons = ?blocked, "NO_TRADE");
        let hash = setup_hash(&snapshot.symbol, Direction::None, Tier::NoTrade, None, profile.price_step);
        Signal::no_trade(snapshot.symbol.clone(), snapshot.timestamp, score, criteria, blocked, hash)
    }

    fn grade(
        &self,
        side: Side,
        score: f64,
        adx: f64,
        biases: &BTreeMap<Timeframe, Bias>,
        profile: &SymbolConfig,
    ) -> Option<EntryTier> {
        let aligned = |tf: Timeframe| biases.get(&tf).is_some_and(|b| b.agrees(side));
        let consensus = aligned(Timeframe::Daily) && aligned(Timeframe::H4) && aligned(Timeframe::H1);

        if consensus && score >= profile.a_plus_score && adx >= profile.a_plus_adx {
            Some(EntryTier::APlus)
        } else if consensus && score >= profile.a_score && adx >= profile.a_adx {
            Some(EntryTier::A)
        } else if self.config.enable_b_tier
            && score >= profile.b_score
            && adx >= profile.b_adx
            && aligned(Timeframe::H1)
            && aligned(Timeframe::M15)
        {
            Some(EntryTier::B)
        } else {
            None
        }
    }
}

impl Scorer for ConfluenceScorer {
    fn evaluate(&self, snapshot: &IndicatorSnapshot) -> Signal {
        let profile = self.symbols.get(&snapshot.symbol);
        let mut criteria = Vec::new();
        let mut blocked = Vec::new();

        // ── Data sufficiency ──
        let mut valid: Vec<&TimeframeSnapshot> = Vec::new();
        let mut defects: BTreeMap<Timeframe, String> = BTreeMap::new();
        for tf in Timeframe::ALL {
            match snapshot.timeframe(tf) {
                None => {
                    defects.insert(tf, format!("{tf}: missing"));
                }
                Some(frame) => match frame.defect(self.config.min_candles) {
                    Some(defect) => {
                        defects.insert(tf, defect);
                    }
                    None => valid.push(frame),
                },
            }
        }

        let enough = valid.len() >= self.config.min_valid_timeframes;
        criteria.push(Criterion::new(
            "data",
            "Usable timeframes",
            enough,
            format!(
                "{} of {} usable, need {}",
                valid.len(),
                Timeframe::ALL.len(),
                self.config.min_valid_timeframes
            ),
        ));
        if !enough {
            blocked.push(format!(
                "insufficient data: {} of {} timeframes usable, need {}",
                valid.len(),
                Timeframe::ALL.len(),
                self.config.min_valid_timeframes
            ));
            blocked.extend(defects.into_values());
            return self.refuse(snapshot, profile, 0.0, criteria, blocked);
        }

        let anchor_tf = self.config.anchor;
        let Some(anchor) = valid.iter().copied().find(|f| f.timeframe == anchor_tf) else {
            let detail = defects
                .remove(&anchor_tf)
                .unwrap_or_else(|| format!("{anchor_tf}: unusable"));
            blocked.push(format!("anchor timeframe unusable ({detail})"));
            return self.refuse(snapshot, profile, 0.0, criteria, blocked);
        };

        // ── Confluence ──
        let biases: BTreeMap<Timeframe, Bias> = valid.iter().map(|f| (f.timeframe, Bias::of(f))).collect();
        let weight_for = |want: Bias| -> f64 {
            biases
                .iter()
                .filter(|(_, b)| **b == want)
                .map(|(tf, _)| tf.weight())
                .sum()
        };
        let long = weight_for(Bias::Long);
        let short = weight_for(Bias::Short);
        let direction = if long > short {
            Some(Side::Long)
        } else if short > long {
            Some(Side::Short)
        } else {
            None
        };
        let aligned_weight = long.max(short);

        for tf in Timeframe::ALL {
            let (passed, reason) = match (biases.get(&tf), direction) {
                (Some(bias), Some(side)) => (bias.agrees(side), bias.to_string()),
                (Some(bias), None) => (false, bias.to_string()),
                (None, _) => (
                    false,
                    defects.get(&tf).cloned().unwrap_or_else(|| "unavailable".into()),
                ),
            };
            criteria.push(Criterion::new(&format!("bias_{tf}"), format!("{tf} bias"), passed, reason));
        }

        criteria.push(Criterion::new(
            "alignment",
            "Weighted alignment",
            direction.is_some(),
            format!("LONG {long} vs SHORT {short} of 8"),
        ));
        let Some(side) = direction else {
            blocked.push("no directional confluence".into());
            let score = alignment_points(aligned_weight);
            return self.refuse(snapshot, profile, score, criteria, blocked);
        };

        // ── Hard gates ──
        let adx = anchor.indicators.adx();
        let atr = anchor.indicators.atr();

        match adx {
            None => {
                criteria.push(Criterion::new("adx", "Trend strength", false, "unavailable"));
                blocked.push(format!("ADX unavailable on {anchor_tf}"));
            }
            Some(adx) => {
                let ok = adx >= profile.adx_minimum;
                criteria.push(Criterion::new(
                    "adx",
                    "Trend strength",
                    ok,
                    format!("ADX {adx:.1}, minimum {:.1}", profile.adx_minimum),
                ));
                if !ok {
                    blocked.push(format!("ADX {adx:.1} below minimum {:.1}", profile.adx_minimum));
                }
            }
        }

        let atr_floor = profile.min_atr * ATR_FLOOR;
        match atr {
            None => {
                criteria.push(Criterion::new("atr", "Volatility", false, "unavailable"));
                blocked.push(format!("ATR unavailable on {anchor_tf}"));
            }
            Some(atr) => {
                let ok = atr >= atr_floor;
                criteria.push(Criterion::new(
                    "atr",
                    "Volatility",
                    ok,
                    format!("ATR {atr:.2}, floor {atr_floor:.2}"),
                ));
                if !ok {
                    blocked.push(format!("ATR {atr:.2} below floor {atr_floor:.2}"));
                }
            }
        }

        let opposing: Vec<Timeframe> = [Timeframe::Daily, Timeframe::H4]
            .into_iter()
            .filter(|tf| biases.get(tf).is_some_and(|b| b.opposes(side)))
            .collect();
        criteria.push(Criterion::new(
            "htf",
            "Higher timeframes not opposing",
            opposing.is_empty(),
            if opposing.is_empty() {
                "no opposition".to_string()
            } else {
                format!("{} against {side}", join(&opposing))
            },
        ));
        if !opposing.is_empty() {
            blocked.push(format!("counter-trend: {} bias opposes {side}", join(&opposing)));
        }

        let score = alignment_points(aligned_weight)
            + adx.map(adx_points).unwrap_or(0.0)
            + atr.map(|a| atr_points(a, profile.min_atr)).unwrap_or(0.0);

        let (Some(adx), Some(atr)) = (adx, atr) else {
            return self.refuse(snapshot, profile, score, criteria, blocked);
        };
        if !blocked.is_empty() {
            return self.refuse(snapshot, profile, score, criteria, blocked);
        }

        // ── Tier ──
        let Some(tier) = self.grade(side, score, adx, &biases, profile) else {
            criteria.push(Criterion::new("tier", "Tier requirements", false, format!("score {score:.1}")));
            blocked.push(format!("score {score:.1} with ADX {adx:.1} meets no tier"));
            return self.refuse(snapshot, profile, score, criteria, blocked);
        };
        criteria.push(Criterion::new("tier", "Tier requirements", true, format!("{tier} at {score:.1}")));

        // ── Levels ──
        let Some(entry) = anchor.last_close() else {
            blocked.push(format!("no closing price on {anchor_tf}"));
            return self.refuse(snapshot, profile, score, criteria, blocked);
        };
        let risk = atr * profile.stop_atr_multiple;
        let levels = match side {
            Side::Long => TradeLevels {
                entry,
                stop_loss: entry - risk,
                take_profit_1: entry + risk * profile.tp1_rr,
                take_profit_2: entry + risk * profile.tp2_rr,
            },
            Side::Short => TradeLevels {
                entry,
                stop_loss: entry + risk,
                take_profit_1: entry - risk * profile.tp1_rr,
                take_profit_2: entry - risk * profile.tp2_rr,
            },
        };
        let hash = setup_hash(&snapshot.symbol, side.into(), tier.into(), Some(&levels), profile.price_step);

        match Signal::entry(
            snapshot.symbol.clone(),
            snapshot.timestamp,
            side,
            tier,
            levels,
            score,
            criteria.clone(),
            Vec::new(),
            hash,
        ) {
            Ok(signal) => {
                info!(
                    symbol = %snapshot.symbol,
                    %side,
                    %tier,
                    score,
                    entry = levels.entry,
                    stop = levels.stop_loss,
                    "ENTRY signal"
                );
                signal
            }
            Err(e) => {
                error!(symbol = %snapshot.symbol, error = %e, "Refusing malformed ENTRY");
                blocked.push(format!("rejected levels: {e}"));
                self.refuse(snapshot, profile, score, criteria, blocked)
            }
        }
    }
}

fn join(tfs: &[Timeframe]) -> String {
    tfs.iter().map(|t| t.to_string()).collect::<Vec<_>>().join("/")
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Candle, Indicators};
    use chrono::{Duration, Utc};
    use common::SignalType;

    fn frame(tf: Timeframe, bias: Bias, adx: f64, atr: f64) -> TimeframeSnapshot {
        let (close, ema20, ema50, rsi) = match bias {
            Bias::Long => (2010.0, 2000.0, 1990.0, 60.0),
            Bias::Short => (1990.0, 2000.0, 2010.0, 40.0),
            Bias::Neutral => (2000.0, 2000.0, 2000.0, 50.0),
        };
        let start = Utc::now() - Duration::hours(100);
        TimeframeSnapshot {
            timeframe: tf,
            candles: (0..60)
                .map(|i| Candle {
                    timestamp: start + Duration::minutes(i),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                })
                .collect(),
            indicators: Indicators {
                ema20: Some(ema20),
                ema50: Some(ema50),
                rsi: Some(rsi),
                adx: Some(adx),
                atr: Some(atr),
            },
        }
    }

    fn snapshot(biases: [Bias; 5], adx: f64, atr: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: "XAU_USD".into(),
            timestamp: Utc::now(),
            timeframes: Timeframe::ALL
                .iter()
                .zip(biases)
                .map(|(tf, b)| frame(*tf, b, adx, atr))
                .collect(),
        }
    }

    fn scorer() -> ConfluenceScorer {
        ConfluenceScorer::new(ScorerConfig::default(), SymbolBook::default())
    }

    use Bias::{Long as L, Neutral as N, Short as S};

    #[test]
    fn full_confluence_is_a_plus_with_levels() {
        let signal = scorer().evaluate(&snapshot([L, L, L, L, L], 26.0, 4.0));
        assert_eq!(signal.signal_type(), SignalType::Entry);
        assert_eq!(signal.tier(), Tier::APlus);
        assert_eq!(signal.direction(), Direction::Long);
        assert_eq!(signal.score, 10.0);
        assert!(signal.blocked_reasons.is_empty());

        let levels = signal.levels().unwrap();
        assert_eq!(levels.entry, 2010.0);
        assert_eq!(levels.stop_loss, 2004.0);
        assert_eq!(levels.take_profit_1, 2016.0);
        assert_eq!(levels.take_profit_2, 2019.0);
    }

    #[test]
    fn short_confluence_mirrors_levels() {
        let signal = scorer().evaluate(&snapshot([S, S, S, S, S], 26.0, 4.0));
        assert_eq!(signal.direction(), Direction::Short);
        let levels = signal.levels().unwrap();
        assert!(levels.stop_loss > levels.entry);
        assert!(levels.take_profit_2 < levels.take_profit_1);
    }

    #[test]
    fn weak_trend_blocks_despite_alignment() {
        let signal = scorer().evaluate(&snapshot([L, L, L, L, L], 12.0, 4.0));
        assert_eq!(signal.tier(), Tier::NoTrade);
        assert!(signal.blocked_reasons.iter().any(|r| r.contains("ADX")));
        // The numeric score is still reported
        assert!(signal.score > 0.0);
    }

    #[test]
    fn counter_trend_is_blocked() {
        let signal = scorer().evaluate(&snapshot([S, L, L, L, L], 26.0, 4.0));
        assert_eq!(signal.tier(), Tier::NoTrade);
        assert!(signal
            .blocked_reasons
            .iter()
            .any(|r| r.starts_with("counter-trend")));
    }

    #[test]
    fn low_volatility_is_blocked() {
        // Gold floor is 0.7 × 2.5
        let signal = scorer().evaluate(&snapshot([L, L, L, L, L], 26.0, 1.0));
        assert_eq!(signal.tier(), Tier::NoTrade);
        assert!(signal.blocked_reasons.iter().any(|r| r.contains("ATR")));
    }

    #[test]
    fn lower_timeframe_alignment_grants_b() {
        let snap = snapshot([N, N, L, L, L], 16.0, 2.5);
        let signal = scorer().evaluate(&snap);
        assert_eq!(signal.tier(), Tier::B);
        assert_eq!(signal.score, 4.0);

        let strict = ConfluenceScorer::new(
            ScorerConfig {
                enable_b_tier: false,
                ..ScorerConfig::default()
            },
            SymbolBook::default(),
        );
        let signal = strict.evaluate(&snap);
        assert_eq!(signal.tier(), Tier::NoTrade);
        assert!(signal.blocked_reasons.iter().any(|r| r.contains("meets no tier")));
    }

    #[test]
    fn too_few_timeframes_is_no_trade() {
        let mut snap = snapshot([L, L, L, L, L], 26.0, 4.0);
        snap.timeframes.truncate(2);
        let signal = scorer().evaluate(&snap);
        assert_eq!(signal.tier(), Tier::NoTrade);
        assert!(signal.blocked_reasons[0].starts_with("insufficient data"));
    }

    #[test]
    fn missing_adx_is_not_read_as_zero() {
        let mut snap = snapshot([L, L, L, L, L], 26.0, 4.0);
        for tf in &mut snap.timeframes {
            tf.indicators.adx = Some(f64::NAN);
        }
        let signal = scorer().evaluate(&snap);
        assert_eq!(signal.tier(), Tier::NoTrade);
        assert!(signal.blocked_reasons.iter().any(|r| r.contains("ADX unavailable")));
    }

    #[test]
    fn criteria_follow_evaluation_order() {
        let signal = scorer().evaluate(&snapshot([L, L, L, L, L], 26.0, 4.0));
        let keys: Vec<&str> = signal.criteria.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "data", "bias_1d", "bias_4h", "bias_1h", "bias_15m", "bias_5m", "alignment", "adx",
                "atr", "htf", "tier"
            ]
        );
    }

    #[test]
    fn repeated_evaluation_is_deterministic() {
        let snap = snapshot([L, L, L, N, L], 21.0, 3.0);
        let a = scorer().evaluate(&snap);
        let b = scorer().evaluate(&snap);
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_edges() {
        assert_eq!(adx_points(25.0), 3.0);
        assert_eq!(adx_points(19.9), 1.0);
        assert_eq!(adx_points(17.9), 0.0);
        assert_eq!(atr_points(3.75, 2.5), 3.0);
        assert_eq!(atr_points(1.75, 2.5), 1.0);
        assert_eq!(alignment_points(8.0), 4.0);
    }
}
