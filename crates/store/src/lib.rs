use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{AtomicStore, Clock, Error, Result, SystemClock, Versioned};

/// In-process atomic store.
///
/// Stands in for the shared key-value store when every caller lives in one
/// process (tests, single-instance deployments, feed replay). Every trait
/// method takes the write lock once, so each call is one atomic step, which
/// is the same guarantee the external store gives across replicas.
///
/// Fault injection (`set_unavailable`, `set_fail_writes`,
/// `set_fail_writes_to`, `set_latency`) lets callers exercise the
/// infrastructure-error paths.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
    faults: Arc<Faults>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_version: u64,
}

struct Entry {
    value: Value,
    version: u64,
    expires_at: Option<DateTime<Utc>>,
}

enum Value {
    Text(String),
    Set(BTreeSet<String>),
    List(VecDeque<String>),
}

#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
    fail_prefix: Mutex<Option<String>>,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        info!("MemoryStore initialized");
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            clock,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Every operation fails with `StoreUnavailable` while set.
    pub fn set_unavailable(&self, on: bool) {
        self.faults.unavailable.store(on, Ordering::SeqCst);
    }

    /// Mutating operations fail with `StoreUnavailable` while set; reads work.
    pub fn set_fail_writes(&self, on: bool) {
        self.faults.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Mutating operations on keys starting with `prefix` fail while set.
    pub fn set_fail_writes_to(&self, prefix: Option<&str>) {
        let mut slot = self.faults.fail_prefix.lock().unwrap_or_else(|e| e.into_inner());
        *slot = prefix.map(str::to_string);
    }

    /// Delay applied before every operation, to widen race windows.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.faults.latency_ms.store(ms, Ordering::SeqCst);
    }

    async fn before_read(&self) -> Result<()> {
        self.delay().await;
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    async fn before_write(&self, key: &str) -> Result<()> {
        self.before_read().await?;
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory store rejecting writes".into()));
        }
        let blocked = self
            .faults
            .fail_prefix
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix));
        if blocked {
            return Err(Error::StoreUnavailable(format!("memory store rejecting writes to '{key}'")));
        }
        Ok(())
    }

    async fn delay(&self) {
        let ms = self.faults.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>> {
        ttl.map(|ttl| {
            chrono::Duration::from_std(ttl)
                .map(|d| self.clock.now() + d)
                .map_err(|e| Error::Config(format!("TTL out of range: {e}")))
        })
        .transpose()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Drop the entry if its TTL has elapsed, then return what is left.
    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            debug!(key, "Expired key evicted");
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn write_text(&mut self, key: &str, value: String, expires_at: Option<DateTime<Utc>>) -> u64 {
        let version = self.bump();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value),
                version,
                expires_at,
            },
        );
        version
    }

    fn set_mut(&mut self, key: &str, now: DateTime<Utc>) -> Result<&mut BTreeSet<String>> {
        if self.live(key, now).is_none() {
            let version = self.bump();
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(BTreeSet::new()),
                    version,
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Set(set)) => Ok(set),
            _ => Err(wrong_type(key, "set")),
        }
    }

    fn list_mut(&mut self, key: &str, now: DateTime<Utc>) -> Result<&mut VecDeque<String>> {
        if self.live(key, now).is_none() {
            let version = self.bump();
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::List(VecDeque::new()),
                    version,
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::List(list)) => Ok(list),
            _ => Err(wrong_type(key, "list")),
        }
    }
}

fn wrong_type(key: &str, expected: &str) -> Error {
    Error::StoreUnavailable(format!("WRONGTYPE: key '{key}' does not hold a {expected}"))
}

#[async_trait]
impl AtomicStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        self.before_read().await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        match inner.live(key, now) {
            Some(Entry {
                value: Value::Text(value),
                version,
                ..
            }) => Ok(Some(Versioned {
                value: value.clone(),
                version: *version,
            })),
            Some(_) => Err(wrong_type(key, "string")),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<u64> {
        self.before_write(key).await?;
        let mut inner = self.inner.write().await;
        Ok(inner.write_text(key, value, None))
    }

    async fn compare_and_swap(&self, key: &str, expected: Option<u64>, value: String) -> Result<bool> {
        self.before_write(key).await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let current = inner.live(key, now).map(|e| e.version);
        if current != expected {
            debug!(key, ?expected, ?current, "compare_and_swap lost");
            return Ok(false);
        }
        inner.write_text(key, value, None);
        Ok(true)
    }

    async fn put_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        self.before_write(key).await?;
        let expires_at = self.expiry(ttl)?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if inner.live(key, now).is_some() {
            return Ok(false);
        }
        inner.write_text(key, value, expires_at);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.before_write(key).await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if inner.live(key, now).is_none() {
            return Ok(false);
        }
        Ok(inner.entries.remove(key).is_some())
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        self.before_write(key).await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let matches = matches!(
            inner.live(key, now),
            Some(Entry { value: Value::Text(current), .. }) if current == value
        );
        if matches {
            inner.entries.remove(key);
        }
        Ok(matches)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.before_write(key).await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        inner.set_mut(key, now)?.insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        self.before_write(key).await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        inner.set_mut(key, now)?.remove(member);
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.before_read().await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        match inner.live(key, now) {
            Some(Entry { value: Value::Set(set), .. }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key, "set")),
            None => Ok(Vec::new()),
        }
    }

    async fn list_push(&self, key: &str, value: String) -> Result<()> {
        self.before_write(key).await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        inner.list_mut(key, now)?.push_front(value);
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        self.before_read().await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        match inner.live(key, now) {
            Some(Entry { value: Value::List(list), .. }) => Ok(list.iter().take(limit).cloned().collect()),
            Some(_) => Err(wrong_type(key, "list")),
            None => Ok(Vec::new()),
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        self.before_read().await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        match inner.live(key, now) {
            Some(Entry { value: Value::List(list), .. }) => Ok(list.len()),
            Some(_) => Err(wrong_type(key, "list")),
            None => Ok(0),
        }
    }

    async fn list_contains(&self, key: &str, value: &str) -> Result<bool> {
        self.before_read().await?;
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        match inner.live(key, now) {
            Some(Entry { value: Value::List(list), .. }) => Ok(list.iter().any(|v| v == value)),
            Some(_) => Err(wrong_type(key, "list")),
            None => Ok(false),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
