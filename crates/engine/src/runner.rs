use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use common::Signal;
use lifecycle::Tick;
use scorer::IndicatorSnapshot;

use crate::pipeline::Pipeline;

#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Score a fresh snapshot and act on the result.
    Evaluate(IndicatorSnapshot),
    /// Check the symbol's open trade against a price.
    PriceTick { symbol: String, tick: Tick },
    ManualClose { trade_id: String },
    ResetCooldown { symbol: String },
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Running,
    /// Snapshots are dropped; open trades are still monitored.
    Paused,
    Stopped,
}

/// Cloneable handle for feeding the engine and watching its output.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
    signal_tx: broadcast::Sender<Signal>,
}

impl EngineHandle {
    /// Returns false once the engine has shut down.
    pub async fn send(&self, cmd: EngineCommand) -> bool {
        self.command_tx.send(cmd).await.is_ok()
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Admitted signals and EXIT signals, in processing order.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<Signal> {
        self.signal_tx.subscribe()
    }
}

/// Single consumer of the command channel. Commands run one at a time; the
/// store-level gate and locks cover anything running beside it.
pub struct Engine {
    pipeline: Pipeline,
    state: Arc<RwLock<EngineState>>,
    signal_tx: broadcast::Sender<Signal>,
    command_rx: mpsc::Receiver<EngineCommand>,
}

impl Engine {
    pub fn new(pipeline: Pipeline) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (signal_tx, _) = broadcast::channel(1024);
        let state = Arc::new(RwLock::new(EngineState::Running));

        let handle = EngineHandle {
            command_tx,
            state: state.clone(),
            signal_tx: signal_tx.clone(),
        };

        let engine = Engine {
            pipeline,
            state,
            signal_tx,
            command_rx,
        };

        (engine, handle)
    }

    /// Process commands until `Stop` or until every handle is dropped.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Engine running");

        loop {
            match self.command_rx.recv().await {
                Some(EngineCommand::Evaluate(snapshot)) => {
                    if *self.state.read().await == EngineState::Paused {
                        debug!(symbol = %snapshot.symbol, "Paused, snapshot dropped");
                        continue;
                    }
                    self.evaluate(&snapshot).await;
                }

                Some(EngineCommand::PriceTick { symbol, tick }) => {
                    match self.pipeline.monitor(&symbol, tick).await {
                        Ok(Some(report)) => {
                            if report.check.contended {
                                debug!(symbol = %symbol, trade_id = %report.trade_id, "Trade busy, skipped this tick");
                            }
                            self.publish(report.signals);
                        }
                        Ok(None) => {}
                        Err(e) => error!(symbol = %symbol, error = %e, "Monitor failed"),
                    }
                }

                Some(EngineCommand::ManualClose { trade_id }) => match self.pipeline.manual_close(&trade_id).await {
                    Ok(report) => {
                        if report.check.contended {
                            warn!(trade_id = %trade_id, "Manual close hit a busy trade, resend to retry");
                        }
                        self.publish(report.signals);
                    }
                    Err(e) => error!(trade_id = %trade_id, error = %e, "Manual close failed"),
                },

                Some(EngineCommand::ResetCooldown { symbol }) => {
                    if let Err(e) = self.pipeline.reset_cooldown(&symbol).await {
                        error!(symbol = %symbol, error = %e, "Cooldown reset failed");
                    }
                }

                Some(EngineCommand::Pause) => {
                    let mut state = self.state.write().await;
                    if *state == EngineState::Running {
                        info!("Engine paused, evaluation suppressed, monitoring continues");
                        *state = EngineState::Paused;
                    }
                }

                Some(EngineCommand::Resume) => {
                    let mut state = self.state.write().await;
                    if *state == EngineState::Paused {
                        info!("Engine resumed");
                        *state = EngineState::Running;
                    }
                }

                Some(EngineCommand::Stop) => {
                    info!("Engine stopping");
                    break;
                }

                None => {
                    warn!("Engine command channel closed, shutting down");
                    break;
                }
            }
        }

        *self.state.write().await = EngineState::Stopped;
    }

    async fn evaluate(&self, snapshot: &IndicatorSnapshot) {
        match self.pipeline.evaluate_symbol(snapshot).await {
            Ok(evaluation) => {
                if evaluation.admission.allowed() {
                    self.publish(vec![evaluation.signal]);
                }
            }
            Err(e) => error!(symbol = %snapshot.symbol, error = %e, "Evaluation failed"),
        }
    }

    fn publish(&self, signals: Vec<Signal>) {
        for signal in signals {
            // No subscribers is fine.
            let _ = self.signal_tx.send(signal);
        }
    }
}
