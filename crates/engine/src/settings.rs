use std::path::Path;

use serde::{Deserialize, Serialize};

use cache::CacheConfig;
use common::{Error, Result, SymbolBook, SymbolConfig};
use lifecycle::LifecycleConfig;
use scorer::ScorerConfig;

/// Tuning file contents. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scorer: ScorerConfig,
    pub cache: CacheConfig,
    pub lifecycle: LifecycleConfig,
    #[serde(rename = "symbol")]
    pub symbols: Vec<SymbolConfig>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&raw).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Listed symbols, or the built-in gold/silver profiles when none are.
    pub fn symbol_book(&self) -> SymbolBook {
        if self.symbols.is_empty() {
            SymbolBook::default()
        } else {
            SymbolBook::new(self.symbols.iter().cloned())
        }
    }

    fn validate(&self) -> Result<()> {
        for s in &self.symbols {
            if s.symbol.trim().is_empty() {
                return Err(Error::Config("[[symbol]] entry without a symbol name".into()));
            }
            if !(s.stop_atr_multiple > 0.0 && s.tp1_rr > 0.0 && s.tp2_rr > s.tp1_rr) {
                return Err(Error::Config(format!(
                    "{}: need stop_atr_multiple > 0 and 0 < tp1_rr < tp2_rr",
                    s.symbol
                )));
            }
            if s.cooldown_minutes < 0 || s.entry_window_minutes < 0 {
                return Err(Error::Config(format!("{}: durations must not be negative", s.symbol)));
            }
        }
        if self.lifecycle.lock_ttl_ms == 0 {
            return Err(Error::Config("lifecycle.lock_ttl_ms must be positive".into()));
        }
        Ok(())
    }
}
