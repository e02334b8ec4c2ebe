#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use common::{ActiveTrade, AlertSink, AtomicStore, Error, ExitEvent, ManualClock, Result, Signal, Versioned};
use engine::{LogAlertSink, Pipeline, Settings};
use scorer::{Candle, IndicatorSnapshot, Indicators, Timeframe, TimeframeSnapshot};
use store::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// One frame with 60 candles closing at the trend's reference price.
pub fn frame(tf: Timeframe, trend: Trend, adx: f64, atr: f64) -> TimeframeSnapshot {
    let (close, ema20, ema50, rsi) = match trend {
        Trend::Up => (2010.0, 2000.0, 1990.0, 60.0),
        Trend::Down => (1990.0, 2000.0, 2010.0, 40.0),
        Trend::Flat => (2000.0, 2000.0, 2000.0, 50.0),
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

/// Every timeframe trending the same way with strong ADX and ATR. For gold
/// an up trend enters at 2010 with stop 2004, TP1 2016 and TP2 2019.
pub fn snapshot(symbol: &str, trend: Trend) -> IndicatorSnapshot {
    IndicatorSnapshot {
        symbol: symbol.into(),
        timestamp: Utc::now(),
        timeframes: Timeframe::ALL.iter().map(|tf| frame(*tf, trend, 26.0, 4.0)).collect(),
    }
}

/// Alert sink that remembers what it was asked to send.
#[derive(Default)]
pub struct RecordingSink {
    pub entries: Mutex<Vec<String>>,
    pub exits: Mutex<Vec<ExitEvent>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn exit_events(&self) -> Vec<ExitEvent> {
        self.exits.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn entry_alert(&self, _signal: &Signal, trade: &ActiveTrade) -> Result<()> {
        if self.fail {
            return Err(Error::Alert("sink offline".into()));
        }
        self.entries.lock().unwrap().push(trade.id.clone());
        Ok(())
    }

    async fn exit_alert(&self, event: &ExitEvent) -> Result<()> {
        if self.fail {
            return Err(Error::Alert("sink offline".into()));
        }
        self.exits.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: MemoryStore,
    pub clock: ManualClock,
    pub sink: Arc<RecordingSink>,
}

pub fn harness() -> Harness {
    harness_with(Settings::default(), RecordingSink::default())
}

pub fn harness_with(settings: Settings, sink: RecordingSink) -> Harness {
    let clock = ManualClock::default();
    let store = MemoryStore::with_clock(Arc::new(clock.clone()));
    let sink = Arc::new(sink);
    let pipeline = Pipeline::from_settings(&settings, Arc::new(store.clone()), Arc::new(clock.clone()), sink.clone());
    Harness {
        pipeline,
        store,
        clock,
        sink,
    }
}

/// A pipeline that only logs, sharing the harness's store and clock.
pub fn sibling(h: &Harness) -> Pipeline {
    Pipeline::from_settings(
        &Settings::default(),
        Arc::new(h.store.clone()),
        Arc::new(h.clock.clone()),
        Arc::new(LogAlertSink),
    )
}

/// Memory store whose reads of `active_trade:` keys come back empty while
/// `blind` is set. Lets an ENTRY through the gate while its symbol already
/// has a trade, the way a second instance admitting at the same moment does.
#[derive(Clone)]
pub struct ClaimBlindStore {
    inner: MemoryStore,
    blind: Arc<AtomicBool>,
}

#[async_trait]
impl AtomicStore for ClaimBlindStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        if self.blind.load(Ordering::SeqCst) && key.starts_with("active_trade:") {
            return Ok(None);
        }
        self.inner.get(key).await
    }
    async fn put(&self, key: &str, value: String) -> Result<u64> {
        self.inner.put(key, value).await
    }
    async fn compare_and_swap(&self, key: &str, expected: Option<u64>, value: String) -> Result<bool> {
        self.inner.compare_and_swap(key, expected, value).await
    }
    async fn put_if_absent(&self, key: &str, value: String, ttl: Option<std::time::Duration>) -> Result<bool> {
        self.inner.put_if_absent(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }
    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        self.inner.delete_if_value(key, value).await
    }
    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.inner.set_add(key, member).await
    }
    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        self.inner.set_remove(key, member).await
    }
    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.inner.set_members(key).await
    }
    async fn list_push(&self, key: &str, value: String) -> Result<()> {
        self.inner.list_push(key, value).await
    }
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        self.inner.list_range(key, limit).await
    }
    async fn list_len(&self, key: &str) -> Result<usize> {
        self.inner.list_len(key).await
    }
    async fn list_contains(&self, key: &str, value: &str) -> Result<bool> {
        self.inner.list_contains(key, value).await
    }
}

/// Harness over a [`ClaimBlindStore`]; flip the returned flag to hide
/// open trades from the gate.
pub fn claim_blind_harness() -> (Harness, Arc<AtomicBool>) {
    let clock = ManualClock::default();
    let store = MemoryStore::with_clock(Arc::new(clock.clone()));
    let blind = Arc::new(AtomicBool::new(false));
    let wrapped = ClaimBlindStore {
        inner: store.clone(),
        blind: blind.clone(),
    };
    let sink = Arc::new(RecordingSink::default());
    let pipeline = Pipeline::from_settings(&Settings::default(), Arc::new(wrapped), Arc::new(clock.clone()), sink.clone());
    (
        Harness {
            pipeline,
            store,
            clock,
            sink,
        },
        blind,
    )
}
