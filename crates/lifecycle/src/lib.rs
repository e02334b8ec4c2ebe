pub mod config;
pub mod lock;
pub mod rules;
pub mod trades;

pub use config::{LifecycleConfig, StopAfterTp1, TieBreak};
pub use lock::{DistributedLock, LockGuard};
pub use rules::{Tick, Transition};
pub use trades::{ExitCheck, LifecycleStore, TradeStats};
