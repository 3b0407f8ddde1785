//! Result Cache
//!
//! Process-wide, capacity-bounded LRU cache with cost accounting and a TTL per
//! entry. Values are type-erased (`Arc<dyn Any + Send + Sync>`) so one cache
//! instance can hold decoded metadata maps next to partition lists.
//!
//! - Eviction is lazy: inserting evicts least-recently-accessed entries until
//!   the new entry fits. There is no background sweep.
//! - Expiry is checked at lookup; an expired entry is dropped and reported as
//!   a miss.
//! - `get_or_compute` serializes computation per key, so concurrent misses on
//!   the same key run the computation once and share its result.
//!   `update_with` takes the same per-key gate for writes.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

type Value = Arc<dyn Any + Send + Sync>;

/// Output of a `get_or_compute` computation
#[derive(Debug, Clone)]
pub struct Computed<T> {
    pub value: T,
    pub ttl: Duration,
    pub cost: usize,
}

impl<T> Computed<T> {
    pub fn new(value: T, ttl: Duration, cost: usize) -> Self {
        Self { value, ttl, cost }
    }
}

struct Entry {
    value: Value,
    cost: usize,
    expires_at: Instant,
    /// Position in the recency index
    tick: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    tick: u64,
    used: usize,
}

impl State {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.used -= entry.cost;
        Some(entry)
    }

    fn touch(&mut self, key: &str, now: Instant) -> Option<Value> {
        if self.entries.get(key)?.expires_at <= now {
            self.remove(key);
            debug!(key = %key, "Cache entry expired");
            return None;
        }

        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.to_string());
        Some(Arc::clone(&entry.value))
    }

    fn insert(&mut self, key: String, entry_value: Value, cost: usize, expires_at: Instant, capacity: usize) {
        self.remove(&key);

        if cost > capacity {
            debug!(key = %key, cost, capacity, "Cache entry larger than capacity, not stored");
            return;
        }

        while self.used + cost > capacity {
            let Some((_, victim)) = self.recency.pop_first() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&victim) {
                self.used -= evicted.cost;
                debug!(key = %victim, cost = evicted.cost, "Cache entry evicted");
            }
        }

        self.tick += 1;
        let tick = self.tick;
        self.recency.insert(tick, key.clone());
        self.used += cost;
        self.entries.insert(
            key,
            Entry {
                value: entry_value,
                cost,
                expires_at,
                tick,
            },
        );
    }
}

/// Shared result cache (see module docs)
pub struct ResultCache {
    capacity: usize,
    state: Mutex<State>,
    /// One gate per key with a computation in flight
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResultCache {
    /// 1 MiB of cost units
    pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State::default()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total cost of resident entries
    pub fn used(&self) -> usize {
        self.state().used
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached value, if present, unexpired and of type `T`
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.state().touch(key, Instant::now())?;
        match value.downcast::<T>() {
            Ok(typed) => Some(typed),
            Err(_) => {
                debug!(key = %key, "Cache entry has unexpected type, treating as miss");
                None
            }
        }
    }

    /// Unconditional insert or replace
    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>, cost: usize, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.state()
            .insert(key.to_string(), value, cost, expires_at, self.capacity);
    }

    /// Explicit invalidation
    pub fn delete(&self, key: &str) {
        self.state().remove(key);
    }

    /// Return the cached value or run `compute` once to produce it.
    ///
    /// Callers missing on the same key concurrently wait for the first
    /// computation instead of repeating it. A failed computation is not cached;
    /// its error goes to the caller that ran it.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed<T>, E>>,
    {
        if let Some(hit) = self.get::<T>(key) {
            return Ok(hit);
        }

        let gate = self.gate(key);
        let guard = gate.lock().await;

        let result = match self.get::<T>(key) {
            Some(hit) => Ok(hit),
            None => match compute().await {
                Ok(Computed { value, ttl, cost }) => {
                    let value = Arc::new(value);
                    self.put(key, Arc::clone(&value), cost, ttl);
                    Ok(value)
                }
                Err(e) => Err(e),
            },
        };

        drop(guard);
        self.release_gate(key, &gate);
        result
    }

    /// Replace the value under `key` while holding the key's gate.
    ///
    /// The current entry is dropped first and `update` then produces (and
    /// usually persists) the replacement. A concurrent `get_or_compute` on the
    /// same key either completes before `update` starts or waits for it and
    /// sees the new value. On error nothing is cached.
    pub async fn update_with<T, E, F, Fut>(&self, key: &str, update: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed<T>, E>>,
    {
        let gate = self.gate(key);
        let guard = gate.lock().await;

        self.delete(key);
        let result = match update().await {
            Ok(Computed { value, ttl, cost }) => {
                let value = Arc::new(value);
                self.put(key, Arc::clone(&value), cost, ttl);
                Ok(value)
            }
            Err(e) => Err(e),
        };

        drop(guard);
        self.release_gate(key, &gate);
        result
    }

    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            gates
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn release_gate(&self, key: &str, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        // map + caller; anyone else still waiting will release it later
        let unused = gates
            .get(key)
            .map(|g| Arc::ptr_eq(g, gate) && Arc::strong_count(g) <= 2)
            .unwrap_or(false);
        if unused {
            gates.remove(key);
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
