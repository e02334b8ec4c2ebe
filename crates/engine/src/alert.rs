use async_trait::async_trait;
use tracing::info;

use common::{ActiveTrade, AlertSink, ExitEvent, Result, Signal};

/// Writes alerts to the log. The only dispatcher shipped with the engine;
/// chat or webhook delivery plugs in through [`AlertSink`].
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn entry_alert(&self, signal: &Signal, trade: &ActiveTrade) -> Result<()> {
        info!(
            symbol = %trade.symbol,
            trade_id = %trade.id,
            side = ?trade.side,
            tier = %signal.tier(),
            level = signal.alert_level(),
            score = signal.score,
            entry = trade.entry,
            stop_loss = trade.stop_loss,
            tp1 = trade.take_profit_1,
            tp2 = trade.take_profit_2,
            "ALERT entry"
        );
        Ok(())
    }

    async fn exit_alert(&self, event: &ExitEvent) -> Result<()> {
        info!(
            symbol = %event.symbol,
            trade_id = %event.trade_id,
            status = %event.new_status,
            price = event.price,
            "ALERT exit"
        );
        Ok(())
    }
}
