pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod store;
pub mod symbols;
pub mod types;

pub use alert::AlertSink;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use store::{AtomicStore, Versioned};
pub use symbols::{SymbolBook, SymbolConfig};
pub use types::*;
