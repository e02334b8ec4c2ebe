use common::{ActiveTrade, Side, TradeStatus};

use crate::config::{LifecycleConfig, StopAfterTp1, TieBreak};

/// Price observation fed to the exit check. `high`/`low` cover the interval
/// since the previous observation; a bare price has all three equal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub price: f64,
    pub high: f64,
    pub low: f64,
}

impl Tick {
    pub fn at(price: f64) -> Self {
        Self {
            price,
            high: price,
            low: price,
        }
    }

    /// Bar extremes are widened to include `price` itself.
    pub fn with_range(price: f64, high: f64, low: f64) -> Self {
        Self {
            price,
            high: high.max(price),
            low: low.min(price),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.price.is_finite() && self.high.is_finite() && self.low.is_finite()
    }

    fn reached(&self, side: Side, target: f64) -> bool {
        match side {
            Side::Long => self.high >= target,
            Side::Short => self.low <= target,
        }
    }

    fn stopped(&self, side: Side, stop: f64) -> bool {
        match side {
            Side::Long => self.low <= stop,
            Side::Short => self.high >= stop,
        }
    }
}

/// A status change decided for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TradeStatus,
    pub to: TradeStatus,
    /// False when the matching `*_alert_sent` flag was already set.
    pub alert: bool,
}

/// Stop level currently protecting the trade.
pub fn effective_stop(trade: &ActiveTrade, config: &LifecycleConfig) -> f64 {
    match (trade.status, config.stop_after_tp1) {
        (TradeStatus::Tp1Hit, StopAfterTp1::Breakeven) => trade.entry,
        _ => trade.stop_loss,
    }
}

/// Decide the next status from the current one only. Pure.
pub fn next_status(trade: &ActiveTrade, tick: Tick, config: &LifecycleConfig) -> Option<TradeStatus> {
    let side = trade.side;
    let stop_hit = tick.stopped(side, effective_stop(trade, config));
    let tp2_hit = tick.reached(side, trade.take_profit_2);

    let target = match trade.status {
        TradeStatus::Active if tp2_hit => Some(TradeStatus::Tp2Hit),
        TradeStatus::Active if tick.reached(side, trade.take_profit_1) => Some(TradeStatus::Tp1Hit),
        TradeStatus::Tp1Hit if tp2_hit => Some(TradeStatus::Tp2Hit),
        TradeStatus::Active | TradeStatus::Tp1Hit => None,
        // Exit already reported; only the bookkeeping close is left.
        TradeStatus::Tp2Hit => return Some(TradeStatus::Closed),
        TradeStatus::Stopped | TradeStatus::ManuallyClosed | TradeStatus::Closed => return None,
    };

    match (stop_hit, target) {
        (true, Some(target)) => Some(match config.tie_break {
            TieBreak::StopLossFirst => TradeStatus::Stopped,
            TieBreak::TakeProfitFirst => target,
        }),
        (true, None) => Some(TradeStatus::Stopped),
        (false, target) => target,
    }
}

/// Apply `to` to the trade and set the alert flags it implies. Returns
/// `None` if the move is not allowed from the current status.
pub fn apply(trade: &mut ActiveTrade, to: TradeStatus) -> Option<Transition> {
    let from = trade.status;
    if !from.can_transition_to(to) {
        return None;
    }
    let alert = match to {
        TradeStatus::Tp1Hit => !std::mem::replace(&mut trade.tp1_alert_sent, true),
        TradeStatus::Tp2Hit => {
            // Jumping straight to TP2 also consumes the TP1 notice.
            trade.tp1_alert_sent = true;
            !std::mem::replace(&mut trade.tp2_alert_sent, true)
        }
        TradeStatus::Stopped => !std::mem::replace(&mut trade.sl_alert_sent, true),
        TradeStatus::ManuallyClosed => true,
        TradeStatus::Closed | TradeStatus::Active => false,
    };
    trade.status = to;
    Some(Transition { from, to, alert })
}

/// The position is flat: either a terminal status or the final target.
pub fn position_closed(status: TradeStatus) -> bool {
    status.is_terminal() || status == TradeStatus::Tp2Hit
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::EntryTier;

    fn long() -> ActiveTrade {
        ActiveTrade {
            id: "t-1".into(),
            symbol: "XAU_USD".into(),
            side: Side::Long,
            entry: 2000.0,
            stop_loss: 1900.0,
            take_profit_1: 2100.0,
            take_profit_2: 2200.0,
            tier: EntryTier::A,
            status: TradeStatus::Active,
            score: 7.0,
            setup_hash: "h".into(),
            tp1_alert_sent: false,
            tp2_alert_sent: false,
            sl_alert_sent: false,
            created_at: Utc::now(),
            last_checked_at: None,
            last_checked_price: None,
            closed_at: None,
        }
    }

    fn short() -> ActiveTrade {
        ActiveTrade {
            side: Side::Short,
            stop_loss: 2100.0,
            take_profit_1: 1900.0,
            take_profit_2: 1800.0,
            ..long()
        }
    }

    #[test]
    fn long_crossings() {
        let cfg = LifecycleConfig::default();
        let t = long();
        assert_eq!(next_status(&t, Tick::at(2050.0), &cfg), None);
        assert_eq!(next_status(&t, Tick::at(2100.0), &cfg), Some(TradeStatus::Tp1Hit));
        assert_eq!(next_status(&t, Tick::at(2250.0), &cfg), Some(TradeStatus::Tp2Hit));
        assert_eq!(next_status(&t, Tick::at(1900.0), &cfg), Some(TradeStatus::Stopped));
    }

    #[test]
    fn short_crossings_invert() {
        let cfg = LifecycleConfig::default();
        let t = short();
        assert_eq!(next_status(&t, Tick::at(1900.0), &cfg), Some(TradeStatus::Tp1Hit));
        assert_eq!(next_status(&t, Tick::at(2100.0), &cfg), Some(TradeStatus::Stopped));
        assert_eq!(next_status(&t, Tick::at(1950.0), &cfg), None);
    }

    #[test]
    fn gap_bar_follows_tie_break() {
        let bar = Tick::with_range(2000.0, 2150.0, 1850.0);
        let t = long();
        let sl_first = LifecycleConfig::default();
        assert_eq!(next_status(&t, bar, &sl_first), Some(TradeStatus::Stopped));

        let tp_first = LifecycleConfig {
            tie_break: TieBreak::TakeProfitFirst,
            ..LifecycleConfig::default()
        };
        assert_eq!(next_status(&t, bar, &tp_first), Some(TradeStatus::Tp1Hit));
    }

    #[test]
    fn after_tp1_only_tp2_or_stop_apply() {
        let cfg = LifecycleConfig::default();
        let mut t = long();
        t.status = TradeStatus::Tp1Hit;
        assert_eq!(next_status(&t, Tick::at(2100.0), &cfg), None);
        assert_eq!(next_status(&t, Tick::at(1950.0), &cfg), None);
        assert_eq!(next_status(&t, Tick::at(1899.0), &cfg), Some(TradeStatus::Stopped));
        assert_eq!(next_status(&t, Tick::at(2200.0), &cfg), Some(TradeStatus::Tp2Hit));

        let breakeven = LifecycleConfig {
            stop_after_tp1: StopAfterTp1::Breakeven,
            ..LifecycleConfig::default()
        };
        assert_eq!(next_status(&t, Tick::at(1950.0), &breakeven), Some(TradeStatus::Stopped));
    }

    #[test]
    fn flags_are_consumed_once() {
        let mut t = long();
        let first = apply(&mut t, TradeStatus::Tp1Hit).unwrap();
        assert!(first.alert);
        assert!(t.tp1_alert_sent);
        // Same status again is not a transition
        assert!(apply(&mut t, TradeStatus::Tp1Hit).is_none());

        let tp2 = apply(&mut t, TradeStatus::Tp2Hit).unwrap();
        assert!(tp2.alert);
        let close = apply(&mut t, TradeStatus::Closed).unwrap();
        assert!(!close.alert);
        assert!(apply(&mut t, TradeStatus::Stopped).is_none());
    }

    #[test]
    fn preset_flag_suppresses_alert() {
        let mut t = long();
        t.sl_alert_sent = true;
        let stop = apply(&mut t, TradeStatus::Stopped).unwrap();
        assert!(!stop.alert);
        assert_eq!(t.status, TradeStatus::Stopped);
    }

    #[test]
    fn direct_tp2_sets_both_flags() {
        let mut t = long();
        let jump = apply(&mut t, TradeStatus::Tp2Hit).unwrap();
        assert!(jump.alert);
        assert!(t.tp1_alert_sent && t.tp2_alert_sent);
    }
}
