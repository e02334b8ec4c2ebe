use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;

/// A stored value together with the version it was written at. Versions are
/// what compare-and-set compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub version: u64,
}

/// Abstraction over the shared atomic key-value store.
///
/// Every method is a single atomic step on the store; none of them may be
/// composed by the caller into a larger atomic unit except through
/// `compare_and_swap` (read-modify-write) or `put_if_absent` (locks, claims).
/// Keys written with a TTL behave as absent once the TTL has elapsed.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Unconditional write. Returns the new version.
    async fn put(&self, key: &str, value: String) -> Result<u64>;

    /// Write only if the current version equals `expected`
    /// (`None` = key must be absent). Returns whether the write happened.
    async fn compare_and_swap(&self, key: &str, expected: Option<u64>, value: String) -> Result<bool>;

    /// Write only if the key is absent (or expired). Returns whether the
    /// write happened.
    async fn put_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete only if the stored value equals `value`.
    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Prepend to a list (newest first).
    async fn list_push(&self, key: &str, value: String) -> Result<()>;
    /// First `limit` entries, newest first.
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>>;
    async fn list_len(&self, key: &str) -> Result<usize>;
    async fn list_contains(&self, key: &str, value: &str) -> Result<bool>;
}

/// Key layout shared by every instance.
pub mod keys {
    pub const ACTIVE_TRADES: &str = "active_trades";
    pub const TRADE_HISTORY: &str = "trade_history";

    pub fn signal_cache(symbol: &str) -> String {
        format!("signal_cache:{symbol}")
    }

    pub fn active_trade(symbol: &str) -> String {
        format!("active_trade:{symbol}")
    }

    pub fn trade(trade_id: &str) -> String {
        format!("trade:{trade_id}")
    }

    pub fn lock(trade_id: &str) -> String {
        format!("lock:{trade_id}")
    }
}

/// Read and decode a JSON value, returning it with its version.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn AtomicStore,
    key: &str,
) -> Result<Option<(T, u64)>> {
    match store.get(key).await? {
        Some(v) => Ok(Some((serde_json::from_str(&v.value)?, v.version))),
        None => Ok(None),
    }
}

/// Encode and compare-and-swap a JSON value.
pub async fn swap_json<T: Serialize + Sync>(
    store: &dyn AtomicStore,
    key: &str,
    expected: Option<u64>,
    value: &T,
) -> Result<bool> {
    let encoded = serde_json::to_string(value)?;
    store.compare_and_swap(key, expected, encoded).await
}

/// Encode and unconditionally write a JSON value.
pub async fn put_json<T: Serialize + Sync>(store: &dyn AtomicStore, key: &str, value: &T) -> Result<u64> {
    let encoded = serde_json::to_string(value)?;
    store.put(key, encoded).await
}
