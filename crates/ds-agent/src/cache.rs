//! Keyed, time-limited memoisation for summaries.
//!
//! Identical summarisation requests (same query, page, metadata and
//! conversation) within the TTL reuse the earlier summary. The cache is
//! transparent: a miss computes, a hit returns what the miss computed, and
//! failures are never stored.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::trace;

use ds_core::Error;

/// Default entry lifetime: six hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

struct Entry {
    value: String,
    expires_at: Instant,
}

pub struct SummaryCache {
    prefix: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SummaryCache {
    /// A zero `ttl` disables caching.
    pub fn new(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cache key: `<prefix>:<JSON of args>`.
    pub fn key<A: Serialize>(&self, args: &A) -> Result<String, Error> {
        Ok(format!("{}:{}", self.prefix, serde_json::to_string(args)?))
    }

    /// Return the cached value for `args`, or run `compute` and cache its
    /// success.
    ///
    /// The lock is not held while `compute` runs, so concurrent misses for
    /// the same key may both compute; the last one stored wins.
    pub async fn get_or_insert_with<A, F, Fut>(&self, args: &A, compute: F) -> Result<String, Error>
    where
        A: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, Error>>,
    {
        if !self.is_enabled() {
            return compute().await;
        }

        let key = self.key(args)?;
        if let Some(value) = self.get(&key).await {
            trace!(prefix = %self.prefix, "Cache hit");
            return Ok(value);
        }

        let value = compute().await?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(value)
    }

    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
