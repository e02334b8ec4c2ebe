pub mod config;
pub mod gate;
pub mod state;

pub use config::CacheConfig;
pub use gate::{Admission, Decision, RejectionReason, SignalCache};
pub use state::{AlertState, CacheSnapshot, CooldownState, FailedSetup, Reservation, TradeState};
