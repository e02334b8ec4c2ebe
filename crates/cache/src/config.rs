use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Signal cache settings (`[cache]` in the settings file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// A repeat of the last alerted hash is only re-sent after this long.
    pub min_alert_spacing_minutes: i64,
    /// How long a losing setup stays blacklisted.
    pub failed_setup_retention_hours: i64,
    /// Upper bound on remembered losing setups per symbol; oldest go first.
    pub failed_setup_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_alert_spacing_minutes: 5,
            failed_setup_retention_hours: 24,
            failed_setup_capacity: 50,
        }
    }
}

impl CacheConfig {
    pub fn min_alert_spacing(&self) -> Duration {
        Duration::minutes(self.min_alert_spacing_minutes.max(0))
    }

    pub fn failed_setup_retention(&self) -> Duration {
        Duration::hours(self.failed_setup_retention_hours.max(0))
    }
}
