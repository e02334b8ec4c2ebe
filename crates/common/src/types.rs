use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Direction ────────────────────────────────────────────────────────────────

/// Side of a tradable setup or an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Direction reported on a signal. `None` only ever accompanies NO_TRADE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    None,
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => Direction::Long,
            Side::Short => Direction::Short,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
            Direction::None => write!(f, "NONE"),
        }
    }
}

// ─── Tier ─────────────────────────────────────────────────────────────────────

/// Quality grade of a setup. Variant order gives `NoTrade < B < A < APlus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "NO_TRADE")]
    NoTrade,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl Tier {
    /// Alert urgency: A+ → 3, A → 2, B → 1, NO_TRADE → 0.
    pub fn alert_level(self) -> u8 {
        match self {
            Tier::APlus => 3,
            Tier::A => 2,
            Tier::B => 1,
            Tier::NoTrade => 0,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::NoTrade => write!(f, "NO_TRADE"),
            Tier::B => write!(f, "B"),
            Tier::A => write!(f, "A"),
            Tier::APlus => write!(f, "A+"),
        }
    }
}

/// A tier that can back an entry. Having no `NoTrade` variant is what keeps
/// an ENTRY signal from ever carrying NO_TRADE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryTier {
    #[serde(rename = "B")]
    B,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl From<EntryTier> for Tier {
    fn from(tier: EntryTier) -> Self {
        match tier {
            EntryTier::B => Tier::B,
            EntryTier::A => Tier::A,
            EntryTier::APlus => Tier::APlus,
        }
    }
}

impl std::fmt::Display for EntryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Tier::from(*self).fmt(f)
    }
}

// ─── Signal ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Entry,
    Exit,
    NoTrade,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Entry => write!(f, "ENTRY"),
            SignalType::Exit => write!(f, "EXIT"),
            SignalType::NoTrade => write!(f, "NO_TRADE"),
        }
    }
}

/// One line of the scorer's checklist, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub key: String,
    pub label: String,
    pub passed: bool,
    pub reason: String,
}

impl Criterion {
    pub fn new(key: &str, label: impl Into<String>, passed: bool, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            label: label.into(),
            passed,
            reason: reason.into(),
        }
    }
}

/// Entry, stop and target prices attached to an ENTRY signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
}

impl TradeLevels {
    /// Levels must be finite and ordered for the side:
    /// LONG `stop < entry < tp1 <= tp2`, SHORT mirrored.
    pub fn validate(&self, side: Side) -> Result<()> {
        let all = [self.entry, self.stop_loss, self.take_profit_1, self.take_profit_2];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(Error::Invariant(format!("non-finite trade level in {self:?}")));
        }
        let ordered = match side {
            Side::Long => {
                self.stop_loss < self.entry
                    && self.entry < self.take_profit_1
                    && self.take_profit_1 <= self.take_profit_2
            }
            Side::Short => {
                self.stop_loss > self.entry
                    && self.entry > self.take_profit_1
                    && self.take_profit_1 >= self.take_profit_2
            }
        };
        if !ordered {
            return Err(Error::Invariant(format!(
                "{side} levels out of order: entry={} sl={} tp1={} tp2={}",
                self.entry, self.stop_loss, self.take_profit_1, self.take_profit_2
            )));
        }
        Ok(())
    }
}

/// The one direction a NO_TRADE can carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Undirected {
    #[default]
    #[serde(rename = "NONE")]
    None,
}

/// The one tier a NO_TRADE can carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ungraded {
    #[default]
    #[serde(rename = "NO_TRADE")]
    NoTrade,
}

/// What a signal says. Tagged so that `type`, `direction` and `tier` can
/// never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Entry {
        #[serde(rename = "direction")]
        side: Side,
        tier: EntryTier,
        levels: TradeLevels,
    },
    Exit {
        #[serde(rename = "direction")]
        side: Side,
        tier: EntryTier,
        status: TradeStatus,
        price: f64,
    },
    NoTrade {
        #[serde(default)]
        direction: Undirected,
        #[serde(default)]
        tier: Ungraded,
    },
}

/// Output of scoring one symbol at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Continuous confluence score in `[0, 10]`.
    pub score: f64,
    pub criteria: Vec<Criterion>,
    pub blocked_reasons: Vec<String>,
    /// Setup fingerprint used for dedup.
    pub hash: String,
}

impl Signal {
    /// Build an approved ENTRY. Refuses when any blocked reason is present,
    /// since an approval and a block can never coexist.
    #[allow(clippy::too_many_arguments)]
    pub fn entry(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        side: Side,
        tier: EntryTier,
        levels: TradeLevels,
        score: f64,
        criteria: Vec<Criterion>,
        blocked_reasons: Vec<String>,
        hash: String,
    ) -> Result<Self> {
        let symbol = symbol.into();
        if !blocked_reasons.is_empty() {
            return Err(Error::Invariant(format!(
                "{symbol}: ENTRY built with blocked reasons {blocked_reasons:?}"
            )));
        }
        levels.validate(side)?;
        Ok(Self {
            symbol,
            timestamp,
            verdict: Verdict::Entry { side, tier, levels },
            score: clamp_score(score),
            criteria,
            blocked_reasons,
            hash,
        })
    }

    /// Build a NO_TRADE. An empty reason list is filled with a generic one so
    /// that every rejection explains itself.
    pub fn no_trade(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        score: f64,
        criteria: Vec<Criterion>,
        mut blocked_reasons: Vec<String>,
        hash: String,
    ) -> Self {
        if blocked_reasons.is_empty() {
            blocked_reasons.push("no qualifying setup".to_string());
        }
        Self {
            symbol: symbol.into(),
            timestamp,
            verdict: Verdict::NoTrade {
                direction: Undirected::None,
                tier: Ungraded::NoTrade,
            },
            score: clamp_score(score),
            criteria,
            blocked_reasons,
            hash,
        }
    }

    /// EXIT notice for a trade that reached `status` at `price`.
    pub fn exit(trade: &ActiveTrade, status: TradeStatus, price: f64, timestamp: DateTime<Utc>, hash: String) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            timestamp,
            verdict: Verdict::Exit {
                side: trade.side,
                tier: trade.tier,
                status,
                price,
            },
            score: clamp_score(trade.score),
            criteria: Vec::new(),
            blocked_reasons: Vec::new(),
            hash,
        }
    }

    pub fn signal_type(&self) -> SignalType {
        match self.verdict {
            Verdict::Entry { .. } => SignalType::Entry,
            Verdict::Exit { .. } => SignalType::Exit,
            Verdict::NoTrade { .. } => SignalType::NoTrade,
        }
    }

    pub fn direction(&self) -> Direction {
        match self.verdict {
            Verdict::Entry { side, .. } | Verdict::Exit { side, .. } => side.into(),
            Verdict::NoTrade { .. } => Direction::None,
        }
    }

    pub fn tier(&self) -> Tier {
        match self.verdict {
            Verdict::Entry { tier, .. } | Verdict::Exit { tier, .. } => tier.into(),
            Verdict::NoTrade { .. } => Tier::NoTrade,
        }
    }

    pub fn levels(&self) -> Option<&TradeLevels> {
        match &self.verdict {
            Verdict::Entry { levels, .. } => Some(levels),
            _ => None,
        }
    }

    pub fn alert_level(&self) -> u8 {
        self.tier().alert_level()
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.verdict, Verdict::Entry { .. })
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

// ─── Trades ───────────────────────────────────────────────────────────────────

/// Lifecycle status of a trade.
///
/// Progress runs `Active → Tp1Hit → Tp2Hit → Closed`; `Stopped` is reachable
/// from `Active`/`Tp1Hit`, `ManuallyClosed` from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Active,
    Tp1Hit,
    Tp2Hit,
    Stopped,
    ManuallyClosed,
    Closed,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeStatus::Stopped | TradeStatus::ManuallyClosed | TradeStatus::Closed
        )
    }

    /// Position on the progress chain. Absorbing exits rank above everything
    /// so that no sequence can step back out of them.
    pub fn rank(self) -> u8 {
        match self {
            TradeStatus::Active => 0,
            TradeStatus::Tp1Hit => 1,
            TradeStatus::Tp2Hit => 2,
            TradeStatus::Closed => 3,
            TradeStatus::Stopped | TradeStatus::ManuallyClosed => 4,
        }
    }

    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, ManuallyClosed) => true,
            (Active, Tp1Hit) | (Active, Tp2Hit) | (Tp1Hit, Tp2Hit) => true,
            (Active, Stopped) | (Tp1Hit, Stopped) => true,
            (Tp2Hit, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeStatus::Active => "ACTIVE",
            TradeStatus::Tp1Hit => "TP1_HIT",
            TradeStatus::Tp2Hit => "TP2_HIT",
            TradeStatus::Stopped => "STOPPED",
            TradeStatus::ManuallyClosed => "MANUALLY_CLOSED",
            TradeStatus::Closed => "CLOSED",
        };
        write!(f, "{s}")
    }
}

/// One open (or historical) position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "direction", alias = "side")]
    pub side: Side,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub tier: EntryTier,
    pub status: TradeStatus,
    /// Scorer output that opened the trade.
    pub score: f64,
    pub setup_hash: String,
    pub tp1_alert_sent: bool,
    pub tp2_alert_sent: bool,
    pub sl_alert_sent: bool,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_checked_price: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl ActiveTrade {
    pub fn levels(&self) -> TradeLevels {
        TradeLevels {
            entry: self.entry,
            stop_loss: self.stop_loss,
            take_profit_1: self.take_profit_1,
            take_profit_2: self.take_profit_2,
        }
    }
}

/// Notification payload for a qualifying status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub trade_id: String,
    pub symbol: String,
    pub new_status: TradeStatus,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of a closed trade, fed back into the signal cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
