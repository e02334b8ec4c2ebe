use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use common::store::{keys, load_json, put_json};
use common::{
    ActiveTrade, AtomicStore, Clock, Error, ExitEvent, Result, Signal, TradeStatus, Verdict,
};

use crate::config::LifecycleConfig;
use crate::lock::DistributedLock;
use crate::rules::{self, Tick, Transition};

/// Result of an exit check, manual close or finalize.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitCheck {
    /// The position is flat after this call.
    pub closed: bool,
    /// Status observed under the lock; `None` when the lock was busy.
    pub status: Option<TradeStatus>,
    /// Exactly one caller sees `true` per qualifying transition.
    pub alert_should_send: bool,
    /// Present whenever this call changed the status.
    pub event: Option<ExitEvent>,
    /// Another holder had the lock; nothing was read or written.
    pub contended: bool,
}

impl ExitCheck {
    pub fn contended() -> Self {
        Self {
            closed: false,
            status: None,
            alert_should_send: false,
            event: None,
            contended: true,
        }
    }

    fn unchanged(status: TradeStatus) -> Self {
        Self {
            closed: rules::position_closed(status),
            status: Some(status),
            alert_should_send: false,
            event: None,
            contended: false,
        }
    }

    pub fn transitioned(&self) -> bool {
        self.event.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStats {
    pub active: usize,
    pub history: usize,
}

/// Trade records in the shared store, advanced under a per-trade lock.
///
/// Layout: `trade:{id}` holds the record, `active_trade:{symbol}` the id of
/// the symbol's one open trade, `active_trades` the set of open ids and
/// `trade_history` closed ids, newest first.
#[derive(Clone)]
pub struct LifecycleStore {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
    lock: DistributedLock,
    config: LifecycleConfig,
}

impl LifecycleStore {
    pub fn new(store: Arc<dyn AtomicStore>, clock: Arc<dyn Clock>, config: LifecycleConfig) -> Self {
        let lock = DistributedLock::new(store.clone(), config.lock_ttl(), config.lock_wait(), config.lock_poll());
        Self {
            store,
            clock,
            lock,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // ─── Create ───────────────────────────────────────────────────────────────

    /// Open a trade from an admitted ENTRY signal. Fails with
    /// `TradeAlreadyOpen` if the symbol already has a non-terminal trade.
    pub async fn create_trade(&self, signal: &Signal) -> Result<ActiveTrade> {
        let Verdict::Entry { side, tier, levels } = &signal.verdict else {
            error!(symbol = %signal.symbol, kind = %signal.signal_type(), "Refusing trade from non-entry signal");
            return Err(Error::Invariant(format!(
                "{}: cannot open a trade from a {} signal",
                signal.symbol,
                signal.signal_type()
            )));
        };
        levels.validate(*side)?;

        let now = self.clock.now();
        let trade = ActiveTrade {
            id: Uuid::new_v4().to_string(),
            symbol: signal.symbol.clone(),
            side: *side,
            entry: levels.entry,
            stop_loss: levels.stop_loss,
            take_profit_1: levels.take_profit_1,
            take_profit_2: levels.take_profit_2,
            tier: *tier,
            status: TradeStatus::Active,
            score: signal.score,
            setup_hash: signal.hash.clone(),
            tp1_alert_sent: false,
            tp2_alert_sent: false,
            sl_alert_sent: false,
            created_at: now,
            last_checked_at: None,
            last_checked_price: None,
            closed_at: None,
        };

        // The record goes first so a claim never points at a trade that
        // does not exist yet.
        put_json(self.store.as_ref(), &keys::trade(&trade.id), &trade).await?;
        if let Err(e) = self.claim_symbol(&trade).await {
            self.discard(&trade, false).await;
            return Err(e);
        }
        if let Err(e) = self.store.set_add(keys::ACTIVE_TRADES, &trade.id).await {
            self.discard(&trade, true).await;
            return Err(e);
        }

        info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            side = %trade.side,
            tier = %trade.tier,
            entry = trade.entry,
            stop = trade.stop_loss,
            tp1 = trade.take_profit_1,
            tp2 = trade.take_profit_2,
            "Trade opened"
        );
        Ok(trade)
    }

    /// Take `active_trade:{symbol}`. A claim whose holder is terminal or
    /// has no record is cleared and retaken once.
    async fn claim_symbol(&self, trade: &ActiveTrade) -> Result<()> {
        let key = keys::active_trade(&trade.symbol);
        if self.store.put_if_absent(&key, trade.id.clone(), None).await? {
            return Ok(());
        }

        if let Some(holder) = self.store.get(&key).await?.map(|v| v.value) {
            match self.get_trade(&holder).await? {
                Some(held) if !held.status.is_terminal() => {
                    warn!(symbol = %trade.symbol, holder = %holder, "Trade already open");
                    return Err(Error::TradeAlreadyOpen(trade.symbol.clone()));
                }
                Some(_) => self.heal(&holder).await,
                None => {}
            }
            warn!(symbol = %trade.symbol, holder = %holder, "Clearing stale active-trade claim");
            self.store.delete_if_value(&key, &holder).await?;
        }

        if self.store.put_if_absent(&key, trade.id.clone(), None).await? {
            Ok(())
        } else {
            Err(Error::TradeAlreadyOpen(trade.symbol.clone()))
        }
    }

    /// Undo a trade that did not open. The claim goes before the record so
    /// that a leftover claim points at nothing and counts as stale.
    async fn discard(&self, trade: &ActiveTrade, claimed: bool) {
        if claimed {
            if let Err(e) = self
                .store
                .delete_if_value(&keys::active_trade(&trade.symbol), &trade.id)
                .await
            {
                error!(trade_id = %trade.id, symbol = %trade.symbol, error = %e, "Failed to drop claim of unopened trade");
            }
        }
        if let Err(e) = self.store.delete(&keys::trade(&trade.id)).await {
            error!(trade_id = %trade.id, symbol = %trade.symbol, error = %e, "Failed to drop record of unopened trade");
        }
    }

    // ─── Exit check ───────────────────────────────────────────────────────────

    /// Check a trade against the latest price.
    pub async fn check_exit(&self, trade_id: &str, price: f64) -> Result<ExitCheck> {
        self.check_exit_tick(trade_id, Tick::at(price)).await
    }

    /// Check a trade against a price observation.
    ///
    /// Runs under the trade's lock: the status is re-read after acquiring
    /// it, the transition is computed from that status only and persisted
    /// before the lock is released. A busy lock returns
    /// [`ExitCheck::contended`]; the caller tries again on its next cycle.
    pub async fn check_exit_tick(&self, trade_id: &str, tick: Tick) -> Result<ExitCheck> {
        if !tick.is_finite() {
            return Err(Error::Invariant(format!("non-finite price for trade {trade_id}")));
        }
        let decide = |trade: &mut ActiveTrade| {
            let to = rules::next_status(trade, tick, &self.config)?;
            rules::apply(trade, to)
        };
        self.with_lock(trade_id, decide, Some(tick.price)).await
    }

    /// Operator close of any non-terminal trade.
    pub async fn manual_close(&self, trade_id: &str) -> Result<ExitCheck> {
        let check = self
            .with_lock(trade_id, |trade| rules::apply(trade, TradeStatus::ManuallyClosed), None)
            .await?;
        if check.transitioned() {
            info!(trade_id, "Trade closed manually");
        }
        Ok(check)
    }

    /// Finalize a trade whose last target was hit and reported: TP2_HIT → CLOSED.
    pub async fn close(&self, trade_id: &str) -> Result<ExitCheck> {
        let decide = |trade: &mut ActiveTrade| match trade.status {
            TradeStatus::Tp2Hit => rules::apply(trade, TradeStatus::Closed),
            _ => None,
        };
        self.with_lock(trade_id, decide, None).await
    }

    async fn with_lock<F>(&self, trade_id: &str, decide: F, price: Option<f64>) -> Result<ExitCheck>
    where
        F: FnOnce(&mut ActiveTrade) -> Option<Transition>,
    {
        let Some(guard) = self.lock.acquire(trade_id).await? else {
            debug!(trade_id, "Trade lock busy");
            return Ok(ExitCheck::contended());
        };

        let result = self.locked_update(trade_id, decide, price).await;

        if let Err(e) = self.lock.release(guard).await {
            // The TTL frees it eventually.
            warn!(trade_id, error = %e, "Failed to release trade lock");
        }
        if let Err(e) = &result {
            error!(trade_id, error = %e, "Trade update failed");
        }
        result
    }

    async fn locked_update<F>(&self, trade_id: &str, decide: F, price: Option<f64>) -> Result<ExitCheck>
    where
        F: FnOnce(&mut ActiveTrade) -> Option<Transition>,
    {
        let key = keys::trade(trade_id);
        let Some((mut trade, _)) = load_json::<ActiveTrade>(self.store.as_ref(), &key).await? else {
            return Err(Error::TradeNotFound(trade_id.to_string()));
        };

        if trade.status.is_terminal() {
            // Finish bookkeeping a previous holder may not have completed.
            self.finish_terminal(&trade).await?;
            return Ok(ExitCheck::unchanged(trade.status));
        }

        let now = self.clock.now();
        let transition = decide(&mut trade);
        if let Some(price) = price {
            trade.last_checked_at = Some(now);
            trade.last_checked_price = Some(price);
        }

        let Some(transition) = transition else {
            if price.is_some() {
                put_json(self.store.as_ref(), &key, &trade).await?;
            }
            return Ok(ExitCheck::unchanged(trade.status));
        };

        if transition.to.is_terminal() {
            trade.closed_at = Some(now);
        }
        put_json(self.store.as_ref(), &key, &trade).await?;

        // The status is committed from here on, so the caller must get the
        // event. Unfinished bookkeeping is picked up by the next locked read
        // of this trade.
        if transition.to.is_terminal() {
            if let Err(e) = self.finish_terminal(&trade).await {
                warn!(trade_id, symbol = %trade.symbol, error = %e, "Trade closed, index cleanup deferred");
            }
        }

        info!(
            trade_id,
            symbol = %trade.symbol,
            from = %transition.from,
            to = %transition.to,
            price = ?price,
            alert = transition.alert,
            "Trade status changed"
        );

        let event_price = price
            .or(trade.last_checked_price)
            .unwrap_or(trade.entry);
        Ok(ExitCheck {
            closed: rules::position_closed(transition.to),
            status: Some(transition.to),
            alert_should_send: transition.alert,
            event: Some(ExitEvent {
                trade_id: trade.id.clone(),
                symbol: trade.symbol.clone(),
                new_status: transition.to,
                price: event_price,
                timestamp: now,
            }),
            contended: false,
        })
    }

    /// History first, claim last: while anything is missing the claim still
    /// points here, which is what [`get_active_trade`](Self::get_active_trade)
    /// uses to find trades to finish.
    async fn finish_terminal(&self, trade: &ActiveTrade) -> Result<()> {
        if !self.store.list_contains(keys::TRADE_HISTORY, &trade.id).await? {
            self.store.list_push(keys::TRADE_HISTORY, trade.id.clone()).await?;
        }
        self.store.set_remove(keys::ACTIVE_TRADES, &trade.id).await?;
        self.store
            .delete_if_value(&keys::active_trade(&trade.symbol), &trade.id)
            .await?;
        Ok(())
    }

    /// Complete a terminal trade's bookkeeping under its lock.
    async fn heal(&self, trade_id: &str) {
        match self.with_lock(trade_id, |_| None, None).await {
            Ok(check) if check.contended => debug!(trade_id, "Trade busy, cleanup left to its holder"),
            Ok(_) => debug!(trade_id, "Terminal trade bookkeeping complete"),
            Err(e) => warn!(trade_id, error = %e, "Terminal trade cleanup still pending"),
        }
    }

    // ─── Queries ──────────────────────────────────────────────────────────────

    pub async fn get_trade(&self, trade_id: &str) -> Result<Option<ActiveTrade>> {
        Ok(load_json::<ActiveTrade>(self.store.as_ref(), &keys::trade(trade_id))
            .await?
            .map(|(trade, _)| trade))
    }

    /// The symbol's open trade, if any. A claim still held by a terminal
    /// trade has its bookkeeping finished on the way.
    pub async fn get_active_trade(&self, symbol: &str) -> Result<Option<ActiveTrade>> {
        let Some(id) = self.store.get(&keys::active_trade(symbol)).await? else {
            return Ok(None);
        };
        match self.get_trade(&id.value).await? {
            Some(trade) if trade.status.is_terminal() => {
                self.heal(&trade.id).await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Every open trade, oldest first.
    pub async fn active_trades(&self) -> Result<Vec<ActiveTrade>> {
        let mut trades = Vec::new();
        for id in self.store.set_members(keys::ACTIVE_TRADES).await? {
            match self.get_trade(&id).await? {
                Some(trade) if !trade.status.is_terminal() => trades.push(trade),
                Some(_) => {}
                None => warn!(trade_id = %id, "Active index points at a missing trade"),
            }
        }
        trades.sort_by_key(|t| t.created_at);
        Ok(trades)
    }

    /// Closed trades, newest first.
    pub async fn get_history(&self, limit: usize) -> Result<Vec<ActiveTrade>> {
        let mut trades = Vec::new();
        for id in self.store.list_range(keys::TRADE_HISTORY, limit).await? {
            if let Some(trade) = self.get_trade(&id).await? {
                trades.push(trade);
            }
        }
        Ok(trades)
    }

    pub async fn stats(&self) -> Result<TradeStats> {
        Ok(TradeStats {
            active: self.active_trades().await?.len(),
            history: self.store.list_len(keys::TRADE_HISTORY).await?,
        })
    }
}
