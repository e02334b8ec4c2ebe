use std::sync::Arc;

use tracing::{debug, error, warn};

use cache::{Admission, CacheSnapshot, Reservation, SignalCache};
use common::fingerprint::exit_hash;
use common::{ActiveTrade, AlertSink, AtomicStore, Clock, Error, Outcome, Result, Signal, TradeStatus};
use lifecycle::{ExitCheck, LifecycleStore, Tick};
use scorer::{ConfluenceScorer, IndicatorSnapshot, Scorer};

use crate::settings::Settings;

/// Attempts for feeding an outcome or revocation back into the cache before
/// giving up.
const OUTCOME_ATTEMPTS: usize = 3;

/// What happened to one snapshot.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub signal: Signal,
    pub admission: Admission,
    /// Present when the signal opened a trade.
    pub trade: Option<ActiveTrade>,
    /// An entry alert was delivered.
    pub alerted: bool,
}

/// What happened to one open trade on a price observation.
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub trade_id: String,
    pub symbol: String,
    pub check: ExitCheck,
    /// EXIT signal for every status change this call made.
    pub signals: Vec<Signal>,
    /// An exit alert was delivered.
    pub alerted: bool,
}

/// Scorer → signal cache → trade store → alert sink.
///
/// Holds no state of its own; everything shared lives in the store, so any
/// number of pipelines may run against the same store.
#[derive(Clone)]
pub struct Pipeline {
    scorer: Arc<dyn Scorer>,
    cache: SignalCache,
    trades: LifecycleStore,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        scorer: Arc<dyn Scorer>,
        cache: SignalCache,
        trades: LifecycleStore,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scorer,
            cache,
            trades,
            alerts,
            clock,
        }
    }

    /// Wire the default components from a settings file.
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn AtomicStore>,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let symbols = settings.symbol_book();
        let scorer = Arc::new(ConfluenceScorer::new(settings.scorer.clone(), symbols.clone()));
        let cache = SignalCache::new(store.clone(), clock.clone(), symbols, settings.cache.clone());
        let trades = LifecycleStore::new(store, clock.clone(), settings.lifecycle.clone());
        Self::new(scorer, cache, trades, alerts, clock)
    }

    pub fn cache(&self) -> &SignalCache {
        &self.cache
    }

    pub fn trades(&self) -> &LifecycleStore {
        &self.trades
    }

    // ─── Evaluation ───────────────────────────────────────────────────────────

    /// Score a snapshot, gate the result and open a trade for an admitted
    /// ENTRY. The entry alert goes out only when the gate allows it.
    pub async fn evaluate_symbol(&self, snapshot: &IndicatorSnapshot) -> Result<Evaluation> {
        let signal = self.scorer.evaluate(snapshot);
        let admission = self.cache.admit(&signal).await;
        let mut evaluation = Evaluation {
            signal,
            admission,
            trade: None,
            alerted: false,
        };

        if !evaluation.admission.allowed() {
            debug!(
                symbol = %evaluation.signal.symbol,
                reason = %evaluation.admission.reason(),
                "Signal not admitted"
            );
            return Ok(evaluation);
        }
        if !evaluation.signal.is_entry() {
            return Ok(evaluation);
        }

        let symbol = evaluation.signal.symbol.clone();
        let trade = match self.trades.create_trade(&evaluation.signal).await {
            Ok(trade) => trade,
            Err(e) => {
                // The gate already recorded this setup as traded.
                if let Some(reservation) = &evaluation.admission.reservation {
                    self.revoke(&symbol, reservation).await;
                }
                return match e {
                    Error::TradeAlreadyOpen(_) => {
                        warn!(symbol = %symbol, "Admitted entry lost the race for the symbol");
                        Ok(evaluation)
                    }
                    other => Err(other),
                };
            }
        };

        if evaluation.admission.send_alert {
            match self.alerts.entry_alert(&evaluation.signal, &trade).await {
                Ok(()) => evaluation.alerted = true,
                Err(e) => error!(symbol = %symbol, trade_id = %trade.id, error = %e, "Entry alert failed"),
            }
        }
        evaluation.trade = Some(trade);
        Ok(evaluation)
    }

    // ─── Monitoring ───────────────────────────────────────────────────────────

    /// Check the symbol's open trade against a price. `Ok(None)` when the
    /// symbol has no open trade.
    pub async fn monitor(&self, symbol: &str, tick: Tick) -> Result<Option<ExitReport>> {
        let Some(trade) = self.trades.get_active_trade(symbol).await? else {
            return Ok(None);
        };
        let check = self.trades.check_exit_tick(&trade.id, tick).await?;
        Ok(Some(self.settle(&trade, check).await))
    }

    /// Operator close of a trade by id.
    pub async fn manual_close(&self, trade_id: &str) -> Result<ExitReport> {
        let trade = self
            .trades
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| Error::TradeNotFound(trade_id.to_string()))?;
        let check = self.trades.manual_close(trade_id).await?;
        Ok(self.settle(&trade, check).await)
    }

    pub async fn reset_cooldown(&self, symbol: &str) -> Result<CacheSnapshot> {
        self.cache.reset_cooldown(symbol).await
    }

    /// Alert, convert to EXIT signals and feed the result back to the cache.
    async fn settle(&self, trade: &ActiveTrade, check: ExitCheck) -> ExitReport {
        let mut report = ExitReport {
            trade_id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            check,
            signals: Vec::new(),
            alerted: false,
        };
        let Some(event) = report.check.event.clone() else {
            return report;
        };

        if report.check.alert_should_send {
            match self.alerts.exit_alert(&event).await {
                Ok(()) => report.alerted = true,
                Err(e) => error!(trade_id = %trade.id, status = %event.new_status, error = %e, "Exit alert failed"),
            }
        }
        report.signals.push(self.exit_signal(trade, event.new_status, event.price));

        match event.new_status {
            TradeStatus::Tp2Hit => {
                self.record(&trade.symbol, Outcome::Win).await;
                match self.trades.close(&trade.id).await {
                    Ok(closed) => {
                        if let Some(done) = &closed.event {
                            report.signals.push(self.exit_signal(trade, done.new_status, done.price));
                        }
                        report.check.closed = closed.closed || report.check.closed;
                    }
                    // The next monitor pass finalizes it.
                    Err(e) => warn!(trade_id = %trade.id, error = %e, "Finalize after TP2 failed"),
                }
            }
            TradeStatus::Closed => self.record(&trade.symbol, Outcome::Win).await,
            TradeStatus::Stopped => self.record(&trade.symbol, Outcome::Loss).await,
            TradeStatus::ManuallyClosed => {
                if let Err(e) = self.cache.release(&trade.symbol).await {
                    error!(symbol = %trade.symbol, error = %e, "Failed to release symbol after manual close");
                }
            }
            TradeStatus::Active | TradeStatus::Tp1Hit => {}
        }
        report
    }

    fn exit_signal(&self, trade: &ActiveTrade, status: TradeStatus, price: f64) -> Signal {
        let hash = exit_hash(&trade.id, &status.to_string());
        Signal::exit(trade, status, price, self.clock.now(), hash)
    }

    async fn record(&self, symbol: &str, outcome: Outcome) {
        for attempt in 1..=OUTCOME_ATTEMPTS {
            match self.cache.record_outcome(symbol, outcome).await {
                Ok(_) => return,
                Err(e) if e.is_transient() && attempt < OUTCOME_ATTEMPTS => {
                    debug!(symbol, %outcome, attempt, error = %e, "Retrying outcome");
                }
                Err(e) => {
                    error!(symbol, %outcome, error = %e, "Failed to record outcome");
                    return;
                }
            }
        }
    }

    async fn revoke(&self, symbol: &str, reservation: &Reservation) {
        for attempt in 1..=OUTCOME_ATTEMPTS {
            match self.cache.revoke(symbol, reservation).await {
                Ok(_) => return,
                Err(e) if e.is_transient() && attempt < OUTCOME_ATTEMPTS => {
                    debug!(symbol, attempt, error = %e, "Retrying revocation");
                }
                Err(e) => {
                    error!(symbol, hash = %reservation.hash, error = %e, "Failed to revoke admission of unopened trade");
                    return;
                }
            }
        }
    }
}
