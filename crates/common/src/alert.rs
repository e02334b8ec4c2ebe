use async_trait::async_trait;

use crate::{ActiveTrade, ExitEvent, Result, Signal};

/// Delivery side of notifications.
///
/// The engine calls each method at most once per qualifying transition; the
/// implementation only formats and delivers.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// A new trade was opened from an admitted ENTRY signal.
    async fn entry_alert(&self, signal: &Signal, trade: &ActiveTrade) -> Result<()>;

    /// A trade crossed a target or stop, or was closed by the operator.
    async fn exit_alert(&self, event: &ExitEvent) -> Result<()>;
}
