use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::{Direction, Outcome, Signal, SignalType, SymbolConfig};

use crate::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeState {
    Idle,
    Active,
    Cooldown,
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeState::Idle => write!(f, "IDLE"),
            TradeState::Active => write!(f, "ACTIVE"),
            TradeState::Cooldown => write!(f, "COOLDOWN"),
        }
    }
}

/// A setup that lost, remembered so it is not traded again right away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSetup {
    pub hash: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    pub trade_state: TradeState,
    pub state_change_time: DateTime<Utc>,
    pub cooldown_expiry: Option<DateTime<Utc>>,
    pub last_traded_setup_hash: Option<String>,
    /// Oldest first.
    pub failed_setup_hashes: Vec<FailedSetup>,
    pub entry_window_start: Option<DateTime<Utc>>,
    pub entry_window_expiry: Option<DateTime<Utc>>,
}

impl CooldownState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            trade_state: TradeState::Idle,
            state_change_time: now,
            cooldown_expiry: None,
            last_traded_setup_hash: None,
            failed_setup_hashes: Vec::new(),
            entry_window_start: None,
            entry_window_expiry: None,
        }
    }

    fn enter(&mut self, state: TradeState, now: DateTime<Utc>) {
        self.trade_state = state;
        self.state_change_time = now;
    }

    fn clear_entry_window(&mut self) {
        self.entry_window_start = None;
        self.entry_window_expiry = None;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertState {
    pub last_alert_time: Option<DateTime<Utc>>,
    pub last_alert_type: Option<SignalType>,
    pub last_alert_direction: Option<Direction>,
    pub last_alert_level: u8,
    pub consecutive_no_trades: u32,
    pub last_signal_hash: Option<String>,
    pub last_sent_hash: Option<String>,
}

/// What an admitted ENTRY overwrote. Handed back through
/// [`SignalCache::revoke`](crate::SignalCache::revoke) when the trade for it
/// never opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub hash: String,
    /// The admission also claimed the alert slot.
    pub alert_reserved: bool,
    cooldown: CooldownState,
    alert: AlertState,
}

/// Everything the cache keeps for one symbol, stored as one JSON document
/// so that a single compare-and-swap covers both halves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub symbol: String,
    pub cooldown: CooldownState,
    pub alert: AlertState,
}

impl CacheSnapshot {
    pub fn fresh(symbol: &str, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            cooldown: CooldownState::new(now),
            alert: AlertState::default(),
        }
    }

    pub fn trade_state(&self) -> TradeState {
        self.cooldown.trade_state
    }

    pub fn cooldown_active(&self, now: DateTime<Utc>) -> bool {
        self.cooldown.trade_state == TradeState::Cooldown
            && self.cooldown.cooldown_expiry.is_some_and(|until| now < until)
    }

    /// Whether the last admitted setup can still be acted on.
    pub fn entry_window_open(&self, now: DateTime<Utc>) -> bool {
        match (self.cooldown.entry_window_start, self.cooldown.entry_window_expiry) {
            (Some(start), Some(expiry)) => start <= now && now < expiry,
            _ => false,
        }
    }

    pub fn is_failed_setup(&self, hash: &str, now: DateTime<Utc>, retention: Duration) -> bool {
        self.cooldown
            .failed_setup_hashes
            .iter()
            .any(|f| f.hash == hash && now - f.recorded_at < retention)
    }

    pub fn consecutive_no_trades(&self) -> u32 {
        self.alert.consecutive_no_trades
    }

    /// Housekeeping done on every write: lapsed cooldowns return to IDLE,
    /// lapsed entry windows and blacklist entries are dropped.
    pub(crate) fn expire(&mut self, now: DateTime<Utc>, config: &CacheConfig) {
        let cd = &mut self.cooldown;
        if cd.trade_state == TradeState::Cooldown && cd.cooldown_expiry.is_some_and(|until| now >= until) {
            cd.enter(TradeState::Idle, now);
            cd.cooldown_expiry = None;
        }
        if cd.entry_window_expiry.is_some_and(|expiry| now >= expiry) {
            cd.clear_entry_window();
        }
        let retention = config.failed_setup_retention();
        cd.failed_setup_hashes.retain(|f| now - f.recorded_at < retention);
        let excess = cd
            .failed_setup_hashes
            .len()
            .saturating_sub(config.failed_setup_capacity);
        cd.failed_setup_hashes.drain(..excess);
    }

    /// Apply an admitted signal. Returns whether the alert throttle lets it
    /// through; when it does, the alert bookkeeping is updated in the same
    /// document so the two can never disagree.
    pub(crate) fn admit(
        &mut self,
        signal: &Signal,
        now: DateTime<Utc>,
        profile: &SymbolConfig,
        config: &CacheConfig,
    ) -> bool {
        self.alert.last_signal_hash = Some(signal.hash.clone());
        match signal.signal_type() {
            SignalType::NoTrade => {
                self.alert.consecutive_no_trades = self.alert.consecutive_no_trades.saturating_add(1);
                false
            }
            // Exit notices are deduplicated by the trade's own flags.
            SignalType::Exit => false,
            SignalType::Entry => {
                self.alert.consecutive_no_trades = 0;
                let cd = &mut self.cooldown;
                cd.enter(TradeState::Active, now);
                cd.cooldown_expiry = None;
                cd.last_traded_setup_hash = Some(signal.hash.clone());
                cd.entry_window_start = Some(now);
                cd.entry_window_expiry = Some(now + profile.entry_window());

                let fresh_hash = self.alert.last_sent_hash.as_deref() != Some(signal.hash.as_str());
                let spaced = self
                    .alert
                    .last_alert_time
                    .map_or(true, |at| now - at > config.min_alert_spacing());
                let send = fresh_hash || spaced;
                if send {
                    let alert = &mut self.alert;
                    alert.last_alert_time = Some(now);
                    alert.last_alert_type = Some(SignalType::Entry);
                    alert.last_alert_direction = Some(signal.direction());
                    alert.last_alert_level = signal.alert_level();
                    alert.last_sent_hash = Some(signal.hash.clone());
                }
                send
            }
        }
    }

    /// Capture what admitting `hash` is about to overwrite.
    pub(crate) fn reserve(&self, hash: &str) -> Reservation {
        Reservation {
            hash: hash.to_string(),
            alert_reserved: false,
            cooldown: self.cooldown.clone(),
            alert: self.alert.clone(),
        }
    }

    /// Undo an admission whose trade never opened. Only applies while the
    /// reserved setup is still the one the symbol is ACTIVE on; the
    /// blacklist is left as it is. Returns whether anything was restored.
    pub(crate) fn revoke(&mut self, reservation: &Reservation) -> bool {
        let cd = &mut self.cooldown;
        if cd.trade_state != TradeState::Active
            || cd.last_traded_setup_hash.as_deref() != Some(reservation.hash.as_str())
        {
            return false;
        }
        let prior = &reservation.cooldown;
        cd.trade_state = prior.trade_state;
        cd.state_change_time = prior.state_change_time;
        cd.cooldown_expiry = prior.cooldown_expiry;
        cd.last_traded_setup_hash = prior.last_traded_setup_hash.clone();
        cd.entry_window_start = prior.entry_window_start;
        cd.entry_window_expiry = prior.entry_window_expiry;

        let alert = &mut self.alert;
        let prior = &reservation.alert;
        if reservation.alert_reserved && alert.last_sent_hash.as_deref() == Some(reservation.hash.as_str()) {
            alert.last_alert_time = prior.last_alert_time;
            alert.last_alert_type = prior.last_alert_type;
            alert.last_alert_direction = prior.last_alert_direction;
            alert.last_alert_level = prior.last_alert_level;
            alert.last_sent_hash = prior.last_sent_hash.clone();
        }
        if alert.consecutive_no_trades == 0 {
            alert.consecutive_no_trades = prior.consecutive_no_trades;
        }
        true
    }

    pub(crate) fn record_outcome(
        &mut self,
        outcome: Outcome,
        now: DateTime<Utc>,
        profile: &SymbolConfig,
        config: &CacheConfig,
    ) {
        let cd = &mut self.cooldown;
        cd.clear_entry_window();
        match outcome {
            Outcome::Win => {
                cd.enter(TradeState::Idle, now);
                cd.cooldown_expiry = None;
            }
            Outcome::Loss => {
                cd.enter(TradeState::Cooldown, now);
                cd.cooldown_expiry = Some(now + profile.cooldown());
                if let Some(hash) = cd.last_traded_setup_hash.clone() {
                    cd.failed_setup_hashes.retain(|f| f.hash != hash);
                    cd.failed_setup_hashes.push(FailedSetup { hash, recorded_at: now });
                }
            }
        }
        self.expire(now, config);
    }

    /// A trade ended without a win/loss verdict (operator close).
    pub(crate) fn release(&mut self, now: DateTime<Utc>) {
        let cd = &mut self.cooldown;
        if cd.trade_state == TradeState::Active {
            cd.enter(TradeState::Idle, now);
        }
        cd.clear_entry_window();
    }

    /// Operator reset: back to IDLE with no cooldown, traded hash or entry
    /// window. The losing-setup blacklist and the alert throttle survive.
    pub(crate) fn reset_cooldown(&mut self, now: DateTime<Utc>) {
        let cd = &mut self.cooldown;
        cd.enter(TradeState::Idle, now);
        cd.cooldown_expiry = None;
        cd.last_traded_setup_hash = None;
        cd.clear_entry_window();
        self.alert.consecutive_no_trades = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn blacklist_is_bounded_and_expires() {
        let config = CacheConfig {
            failed_setup_capacity: 2,
            failed_setup_retention_hours: 1,
            ..CacheConfig::default()
        };
        let profile = SymbolConfig::gold();
        let mut snap = CacheSnapshot::fresh("XAU_USD", t0());
        for (i, hash) in ["a", "b", "c"].iter().enumerate() {
            snap.cooldown.last_traded_setup_hash = Some(hash.to_string());
            snap.record_outcome(Outcome::Loss, t0() + Duration::minutes(i as i64), &profile, &config);
        }
        let hashes: Vec<&str> = snap
            .cooldown
            .failed_setup_hashes
            .iter()
            .map(|f| f.hash.as_str())
            .collect();
        assert_eq!(hashes, ["b", "c"]);

        let later = t0() + Duration::hours(2);
        assert!(!snap.is_failed_setup("c", later, config.failed_setup_retention()));
        snap.expire(later, &config);
        assert!(snap.cooldown.failed_setup_hashes.is_empty());
    }

    #[test]
    fn lapsed_cooldown_returns_to_idle_on_write() {
        let config = CacheConfig::default();
        let profile = SymbolConfig::gold();
        let mut snap = CacheSnapshot::fresh("XAU_USD", t0());
        snap.record_outcome(Outcome::Loss, t0(), &profile, &config);
        assert!(snap.cooldown_active(t0() + Duration::minutes(89)));

        let after = t0() + Duration::minutes(90);
        assert!(!snap.cooldown_active(after));
        snap.expire(after, &config);
        assert_eq!(snap.trade_state(), TradeState::Idle);
        assert_eq!(snap.cooldown.cooldown_expiry, None);
    }

    #[test]
    fn reset_keeps_blacklist() {
        let config = CacheConfig::default();
        let mut snap = CacheSnapshot::fresh("XAU_USD", t0());
        snap.cooldown.last_traded_setup_hash = Some("h".into());
        snap.record_outcome(Outcome::Loss, t0(), &SymbolConfig::gold(), &config);
        snap.reset_cooldown(t0());
        assert_eq!(snap.trade_state(), TradeState::Idle);
        assert_eq!(snap.cooldown.last_traded_setup_hash, None);
        assert_eq!(snap.cooldown.failed_setup_hashes.len(), 1);
    }
}
