use chrono::Utc;
use proptest::prelude::*;

use common::{ActiveTrade, EntryTier, Side, TradeStatus};
use lifecycle::rules::{apply, next_status};
use lifecycle::{LifecycleConfig, StopAfterTp1, Tick, TieBreak};

#[derive(Debug, Clone)]
enum Step {
    Price(f64),
    Bar(f64, f64, f64),
    ManualClose,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        8 => (1700.0f64..2300.0).prop_map(Step::Price),
        3 => (1700.0f64..2300.0, 0.0f64..300.0, 0.0f64..300.0)
            .prop_map(|(p, up, down)| Step::Bar(p, p + up, p - down)),
        1 => Just(Step::ManualClose),
    ]
}

fn config() -> impl Strategy<Value = LifecycleConfig> {
    (
        prop_oneof![Just(TieBreak::StopLossFirst), Just(TieBreak::TakeProfitFirst)],
        prop_oneof![Just(StopAfterTp1::Original), Just(StopAfterTp1::Breakeven)],
    )
        .prop_map(|(tie_break, stop_after_tp1)| LifecycleConfig {
            tie_break,
            stop_after_tp1,
            ..LifecycleConfig::default()
        })
}

fn trade(side: Side) -> ActiveTrade {
    let (stop_loss, take_profit_1, take_profit_2) = match side {
        Side::Long => (1900.0, 2100.0, 2200.0),
        Side::Short => (2100.0, 1900.0, 1800.0),
    };
    ActiveTrade {
        id: "t".into(),
        symbol: "XAU_USD".into(),
        side,
        entry: 2000.0,
        stop_loss,
        take_profit_1,
        take_profit_2,
        tier: EntryTier::B,
        status: TradeStatus::Active,
        score: 5.0,
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

proptest! {
    /// Status never moves backwards, terminal statuses absorb, and each
    /// kind of notice is raised at most once.
    #[test]
    fn statuses_progress_monotonically(
        long in any::<bool>(),
        cfg in config(),
        steps in prop::collection::vec(step(), 1..40),
    ) {
        let mut t = trade(if long { Side::Long } else { Side::Short });
        let mut alerts = std::collections::HashMap::new();

        for s in steps {
            let before = t.status;
            let to = match s {
                Step::Price(p) => next_status(&t, Tick::at(p), &cfg),
                Step::Bar(p, hi, lo) => next_status(&t, Tick::with_range(p, hi, lo), &cfg),
                Step::ManualClose => Some(TradeStatus::ManuallyClosed),
            };
            let Some(to) = to else { continue };
            match apply(&mut t, to) {
                Some(transition) => {
                    prop_assert!(t.status.rank() > before.rank(), "{before} -> {}", t.status);
                    if transition.alert {
                        *alerts.entry(transition.to).or_insert(0) += 1;
                    }
                }
                None => {
                    prop_assert_eq!(t.status, before);
                    prop_assert!(before.is_terminal() || to == before);
                }
            }
        }

        prop_assert!(alerts.values().all(|n| *n == 1));
    }
}
