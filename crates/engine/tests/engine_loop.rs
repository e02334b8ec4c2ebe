mod support;

use std::time::Duration;

use common::{SignalType, TradeStatus, Verdict};
use engine::{Engine, EngineCommand, EngineState};
use lifecycle::Tick;
use support::{harness, snapshot, Trend};
use tokio::time::timeout;

#[tokio::test]
async fn pause_drops_snapshots_but_keeps_monitoring() {
    let h = harness();
    let (engine, handle) = Engine::new(h.pipeline.clone());
    let mut signals = handle.subscribe_signals();
    let task = tokio::spawn(engine.run());

    assert!(handle.send(EngineCommand::Evaluate(snapshot("XAU_USD", Trend::Up))).await);
    let entry = timeout(Duration::from_secs(2), signals.recv()).await.unwrap().unwrap();
    assert_eq!(entry.signal_type(), SignalType::Entry);

    handle.send(EngineCommand::Pause).await;
    handle.send(EngineCommand::Evaluate(snapshot("XAG_USD", Trend::Up))).await;
    handle
        .send(EngineCommand::PriceTick {
            symbol: "XAU_USD".into(),
            tick: Tick::at(2000.0),
        })
        .await;

    let exit = timeout(Duration::from_secs(2), signals.recv()).await.unwrap().unwrap();
    assert!(matches!(
        exit.verdict,
        Verdict::Exit {
            status: TradeStatus::Stopped,
            ..
        }
    ));
    assert_eq!(handle.state().await, EngineState::Paused);

    handle.send(EngineCommand::Stop).await;
    task.await.unwrap();
    assert_eq!(handle.state().await, EngineState::Stopped);

    // The paused snapshot never reached the gate
    assert!(h.pipeline.trades().get_active_trade("XAG_USD").await.unwrap().is_none());
    assert_eq!(h.sink.entry_count(), 1);
    assert!(!handle.send(EngineCommand::Resume).await);
}

#[tokio::test]
async fn resume_and_operator_commands() {
    let h = harness();
    let (engine, handle) = Engine::new(h.pipeline.clone());
    let mut signals = handle.subscribe_signals();
    let task = tokio::spawn(engine.run());

    handle.send(EngineCommand::Pause).await;
    handle.send(EngineCommand::Resume).await;
    handle.send(EngineCommand::Evaluate(snapshot("XAU_USD", Trend::Up))).await;
    let entry = timeout(Duration::from_secs(2), signals.recv()).await.unwrap().unwrap();
    assert!(entry.is_entry());

    let trade = h.pipeline.trades().get_active_trade("XAU_USD").await.unwrap().unwrap();
    handle
        .send(EngineCommand::ManualClose {
            trade_id: trade.id.clone(),
        })
        .await;
    let closed = timeout(Duration::from_secs(2), signals.recv()).await.unwrap().unwrap();
    assert_eq!(closed.signal_type(), SignalType::Exit);
    assert_eq!(closed.symbol, "XAU_USD");

    handle
        .send(EngineCommand::ResetCooldown {
            symbol: "XAU_USD".into(),
        })
        .await;
    handle.send(EngineCommand::Stop).await;
    task.await.unwrap();

    let stored = h.pipeline.trades().get_trade(&trade.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TradeStatus::ManuallyClosed);
    assert_eq!(h.sink.exit_events().len(), 1);
}

#[tokio::test]
async fn dropping_every_handle_stops_the_engine() {
    let h = harness();
    let (engine, handle) = Engine::new(h.pipeline.clone());
    let task = tokio::spawn(engine.run());
    drop(handle);
    timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
}
