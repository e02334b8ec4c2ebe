use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use common::store::{keys, load_json, swap_json};
use common::{AtomicStore, Clock, Error, Outcome, Result, Signal, SignalType, SymbolBook};

use crate::state::{CacheSnapshot, Reservation};
use crate::CacheConfig;

/// Why an admission was refused. Rules are checked in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    CooldownActive { until: DateTime<Utc> },
    DuplicateSetup,
    RecentlyFailedSetup,
    TradeAlreadyOpen,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::CooldownActive { until } => write!(f, "cooldown active until {until}"),
            RejectionReason::DuplicateSetup => write!(f, "duplicate setup"),
            RejectionReason::RecentlyFailedSetup => {
                write!(f, "recently rejected setup, no re-evaluation until window elapses")
            }
            RejectionReason::TradeAlreadyOpen => write!(f, "trade already open"),
        }
    }
}

/// Outcome of the admission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted,
    Rejected(RejectionReason),
    /// The store failed or a concurrent writer won. Neither approval nor
    /// rejection; the scheduler tries again on its next cycle.
    NoDecision(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub decision: Decision,
    /// Set only on admission, and only when the alert throttle agrees.
    pub send_alert: bool,
    /// Present on an admitted ENTRY; pass it to
    /// [`SignalCache::revoke`] if the trade is not opened.
    pub reservation: Option<Reservation>,
}

impl Admission {
    pub fn allowed(&self) -> bool {
        self.decision == Decision::Admitted
    }

    pub fn reason(&self) -> String {
        match &self.decision {
            Decision::Admitted => "admitted".to_string(),
            Decision::Rejected(reason) => reason.to_string(),
            Decision::NoDecision(detail) => format!("no decision: {detail}"),
        }
    }

    fn rejected(reason: RejectionReason) -> Self {
        Self {
            decision: Decision::Rejected(reason),
            send_alert: false,
            reservation: None,
        }
    }
}

/// Per-symbol dedup, cooldown and alert-throttle gate.
///
/// State lives in the shared store under `signal_cache:{symbol}`. Every
/// mutation is one compare-and-swap on that document, so two instances
/// admitting the same symbol at once cannot both win.
#[derive(Clone)]
pub struct SignalCache {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
    symbols: SymbolBook,
    config: CacheConfig,
}

impl SignalCache {
    pub fn new(store: Arc<dyn AtomicStore>, clock: Arc<dyn Clock>, symbols: SymbolBook, config: CacheConfig) -> Self {
        Self {
            store,
            clock,
            symbols,
            config,
        }
    }

    /// Gate a candidate signal. Never returns an error: infrastructure
    /// failures come back as [`Decision::NoDecision`].
    pub async fn admit(&self, signal: &Signal) -> Admission {
        match self.try_admit(signal).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(symbol = %signal.symbol, error = %e, "Admission undecided");
                Admission {
                    decision: Decision::NoDecision(e.to_string()),
                    send_alert: false,
                    reservation: None,
                }
            }
        }
    }

    async fn try_admit(&self, signal: &Signal) -> Result<Admission> {
        let symbol = signal.symbol.as_str();
        let key = keys::signal_cache(symbol);
        let now = self.clock.now();
        let (mut snap, version) = self.load(symbol, now).await?;

        // Exit notices are not gated here.
        if signal.signal_type() != SignalType::Exit {
            if let Some(reason) = self.check(&snap, signal, now).await? {
                info!(symbol, kind = %signal.signal_type(), hash = %signal.hash, %reason, "Signal rejected");
                return Ok(Admission::rejected(reason));
            }
        }

        let profile = self.symbols.get(symbol);
        snap.expire(now, &self.config);
        let mut reservation = signal.is_entry().then(|| snap.reserve(&signal.hash));
        let send_alert = snap.admit(signal, now, profile, &self.config);
        if let Some(reservation) = reservation.as_mut() {
            reservation.alert_reserved = send_alert;
        }

        if !swap_json(self.store.as_ref(), &key, version, &snap).await? {
            return Err(Error::Contended(key));
        }

        if signal.is_entry() {
            info!(
                symbol,
                hash = %signal.hash,
                tier = %signal.tier(),
                send_alert,
                "ENTRY admitted"
            );
        } else {
            debug!(symbol, streak = snap.alert.consecutive_no_trades, "Signal recorded");
        }
        Ok(Admission {
            decision: Decision::Admitted,
            send_alert,
            reservation,
        })
    }

    async fn check(&self, snap: &CacheSnapshot, signal: &Signal, now: DateTime<Utc>) -> Result<Option<RejectionReason>> {
        if snap.cooldown_active(now) {
            if let Some(until) = snap.cooldown.cooldown_expiry {
                return Ok(Some(RejectionReason::CooldownActive { until }));
            }
        }
        if snap.cooldown.last_traded_setup_hash.as_deref() == Some(signal.hash.as_str()) {
            return Ok(Some(RejectionReason::DuplicateSetup));
        }
        if snap.is_failed_setup(&signal.hash, now, self.config.failed_setup_retention()) {
            return Ok(Some(RejectionReason::RecentlyFailedSetup));
        }
        if signal.is_entry() && self.store.get(&keys::active_trade(&signal.symbol)).await?.is_some() {
            return Ok(Some(RejectionReason::TradeAlreadyOpen));
        }
        Ok(None)
    }

    /// Feed back a closed trade's result: LOSS starts the symbol's cooldown
    /// and blacklists the traded setup, WIN returns to IDLE.
    pub async fn record_outcome(&self, symbol: &str, outcome: Outcome) -> Result<CacheSnapshot> {
        let profile = self.symbols.get(symbol);
        let snap = self
            .update(symbol, |snap, now| {
                snap.record_outcome(outcome, now, profile, &self.config)
            })
            .await?;
        info!(
            symbol,
            %outcome,
            state = %snap.trade_state(),
            cooldown_until = ?snap.cooldown.cooldown_expiry,
            "Outcome recorded"
        );
        Ok(snap)
    }

    /// Return an ACTIVE symbol to IDLE after a trade closed without a verdict.
    pub async fn release(&self, symbol: &str) -> Result<CacheSnapshot> {
        self.update(symbol, |snap, now| snap.release(now)).await
    }

    /// Take back an admitted ENTRY whose trade was not opened: the traded
    /// setup, entry window and alert bookkeeping return to what they were
    /// before it. A no-op once the symbol has moved on to another setup.
    pub async fn revoke(&self, symbol: &str, reservation: &Reservation) -> Result<CacheSnapshot> {
        let mut restored = false;
        let snap = self
            .update(symbol, |snap, _| restored = snap.revoke(reservation))
            .await?;
        if restored {
            info!(symbol, hash = %reservation.hash, state = %snap.trade_state(), "Entry admission revoked");
        } else {
            debug!(symbol, hash = %reservation.hash, "Admission already superseded, nothing to revoke");
        }
        Ok(snap)
    }

    /// Operator reset of cooldown, traded setup, entry window and streak.
    /// Losing a race with another writer is reported as `Contended`.
    pub async fn reset_cooldown(&self, symbol: &str) -> Result<CacheSnapshot> {
        let snap = self.update(symbol, |snap, now| snap.reset_cooldown(now)).await?;
        info!(symbol, "Cooldown reset by operator");
        Ok(snap)
    }

    /// Like [`reset_cooldown`](Self::reset_cooldown) but also forgets losing
    /// setups and alert history.
    pub async fn reset_all(&self, symbol: &str) -> Result<CacheSnapshot> {
        let snap = self
            .update(symbol, |snap, now| *snap = CacheSnapshot::fresh(symbol, now))
            .await?;
        info!(symbol, "Signal cache cleared by operator");
        Ok(snap)
    }

    /// Current state, or a fresh IDLE state if the symbol was never seen.
    pub async fn get_state(&self, symbol: &str) -> Result<CacheSnapshot> {
        let (snap, _) = self.load(symbol, self.clock.now()).await?;
        Ok(snap)
    }

    async fn load(&self, symbol: &str, now: DateTime<Utc>) -> Result<(CacheSnapshot, Option<u64>)> {
        let key = keys::signal_cache(symbol);
        Ok(match load_json::<CacheSnapshot>(self.store.as_ref(), &key).await? {
            Some((snap, version)) => (snap, Some(version)),
            None => (CacheSnapshot::fresh(symbol, now), None),
        })
    }

    /// One read-modify-write. Losing the race is reported, not retried.
    async fn update<F>(&self, symbol: &str, mutate: F) -> Result<CacheSnapshot>
    where
        F: FnOnce(&mut CacheSnapshot, DateTime<Utc>),
    {
        let key = keys::signal_cache(symbol);
        let now = self.clock.now();
        let (mut snap, version) = self.load(symbol, now).await?;
        mutate(&mut snap, now);
        snap.expire(now, &self.config);
        if !swap_json(self.store.as_ref(), &key, version, &snap).await? {
            warn!(symbol, "Signal cache write contended");
            return Err(Error::Contended(key));
        }
        Ok(snap)
    }
}
