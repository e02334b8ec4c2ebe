use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Instrument};
use tracing_subscriber::EnvFilter;

use common::{Config, SystemClock};
use engine::{Engine, EngineCommand, EngineHandle, LogAlertSink, Pipeline, Settings};
use lifecycle::Tick;
use scorer::IndicatorSnapshot;
use store::MemoryStore;

/// One line of the replay feed.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FeedRecord {
    Snapshot(IndicatorSnapshot),
    Price {
        symbol: String,
        price: f64,
        #[serde(default)]
        high: Option<f64>,
        #[serde(default)]
        low: Option<f64>,
    },
    ManualClose {
        trade_id: String,
    },
    ResetCooldown {
        symbol: String,
    },
    Pause,
    Resume,
}

impl From<FeedRecord> for EngineCommand {
    fn from(record: FeedRecord) -> Self {
        match record {
            FeedRecord::Snapshot(snapshot) => EngineCommand::Evaluate(snapshot),
            FeedRecord::Price { symbol, price, high, low } => {
                let tick = Tick::with_range(price, high.unwrap_or(price), low.unwrap_or(price));
                EngineCommand::PriceTick { symbol, tick }
            }
            FeedRecord::ManualClose { trade_id } => EngineCommand::ManualClose { trade_id },
            FeedRecord::ResetCooldown { symbol } => EngineCommand::ResetCooldown { symbol },
            FeedRecord::Pause => EngineCommand::Pause,
            FeedRecord::Resume => EngineCommand::Resume,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    let span = tracing::info_span!("sentinel", instance = %cfg.instance);
    run(cfg).instrument(span).await
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let feed_path = cfg.require_feed_path()?.clone();
    let settings = if cfg.settings_path.exists() {
        Settings::load(&cfg.settings_path)?
    } else {
        warn!(path = %cfg.settings_path.display(), "Settings file not found, using defaults");
        Settings::default()
    };
    info!(
        settings = %cfg.settings_path.display(),
        feed = %feed_path.display(),
        symbols = settings.symbols.len(),
        "Sentinel starting"
    );

    // ── Pipeline ──────────────────────────────────────────────────────────────
    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let pipeline = Pipeline::from_settings(&settings, store, clock, Arc::new(LogAlertSink));

    // ── Engine ────────────────────────────────────────────────────────────────
    let (engine, handle) = Engine::new(pipeline.clone());
    let engine_task = tokio::spawn(engine.run().in_current_span());

    let mut signals = handle.subscribe_signals();
    let signal_log = tokio::spawn(
        async move {
            while let Ok(signal) = signals.recv().await {
                info!(
                    symbol = %signal.symbol,
                    kind = %signal.signal_type(),
                    tier = %signal.tier(),
                    score = signal.score,
                    hash = %signal.hash,
                    "Signal"
                );
            }
        }
        .in_current_span(),
    );

    // ── Replay ────────────────────────────────────────────────────────────────
    let fed = replay(&feed_path, &handle).await?;
    handle.send(EngineCommand::Stop).await;
    engine_task.await.context("engine task panicked")?;
    drop(handle);
    let _ = signal_log.await;

    let stats = pipeline.trades().stats().await?;
    for trade in pipeline.trades().active_trades().await? {
        info!(trade_id = %trade.id, symbol = %trade.symbol, status = %trade.status, "Still open");
    }
    info!(records = fed, active = stats.active, closed = stats.history, "Replay finished");
    Ok(())
}

/// Feed every parsable line to the engine. Returns how many were sent.
async fn replay(path: &Path, handle: &EngineHandle) -> anyhow::Result<usize> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open feed {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    let mut fed = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record: FeedRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed feed line");
                continue;
            }
        };
        if !handle.send(record.into()).await {
            warn!(line = line_no, "Engine stopped before the feed ended");
            break;
        }
        fed += 1;
    }
    Ok(fed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_line_without_range_is_a_plain_tick() {
        let record: FeedRecord = serde_json::from_str(r#"{"kind":"price","symbol":"XAU_USD","price":2100.5}"#).unwrap();
        match EngineCommand::from(record) {
            EngineCommand::PriceTick { symbol, tick } => {
                assert_eq!(symbol, "XAU_USD");
                assert_eq!(tick, Tick::at(2100.5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn bar_line_keeps_its_range() {
        let record: FeedRecord =
            serde_json::from_str(r#"{"kind":"price","symbol":"XAU_USD","price":2000,"high":2150,"low":1850}"#)
                .unwrap();
        let EngineCommand::PriceTick { tick, .. } = EngineCommand::from(record) else {
            panic!("expected a price tick");
        };
        assert_eq!(tick.high, 2150.0);
        assert_eq!(tick.low, 1850.0);
    }

    #[test]
    fn snapshot_and_operator_lines_parse() {
        let snapshot = r#"{"kind":"snapshot","symbol":"XAG_USD","timestamp":"2026-01-05T14:00:00Z","timeframes":[]}"#;
        assert!(matches!(
            EngineCommand::from(serde_json::from_str::<FeedRecord>(snapshot).unwrap()),
            EngineCommand::Evaluate(_)
        ));
        assert!(matches!(
            EngineCommand::from(serde_json::from_str::<FeedRecord>(r#"{"kind":"pause"}"#).unwrap()),
            EngineCommand::Pause
        ));
        assert!(serde_json::from_str::<FeedRecord>(r#"{"kind":"launch"}"#).is_err());
    }
}
