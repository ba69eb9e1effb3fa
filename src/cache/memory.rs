//! In-process cache backend.
//!
//! Used when no networked cache is configured or reachable. State is local
//! to this process and lost on restart; callers keep working but quotas are
//! no longer shared between instances.
//!
//! Backed by a bounded moka cache with per-entry expiry: each entry records
//! its own TTL, and moka refuses to return an entry once that TTL has
//! elapsed, so no sweeper task is needed. Read-modify-write operations go
//! through moka's per-key `and_compute_with`, which serialises concurrent
//! writers on the same key.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use globset::Glob;
use moka::Expiry;
use moka::ops::compute::Op;
use moka::sync::Cache;

use super::backend::{BackendKind, CacheBackend, WindowOutcome, WindowRequest};
use crate::{PortcullisError, Result};

/// Default maximum number of entries held in memory.
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Longest per-entry TTL handed to moka, whose clock counts nanoseconds.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    ttl: Option<Duration>,
    /// Set by `increment`, which must not touch an existing expiry.
    keep_ttl: bool,
}

struct EntryExpiry;

impl Expiry<String, MemoryEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl.map(|ttl| ttl.min(MAX_TTL))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        if value.keep_ttl {
            duration_until_expiry
        } else {
            value.ttl.map(|ttl| ttl.min(MAX_TTL))
        }
    }
}

/// Thread-safe in-process implementation of [`CacheBackend`].
pub struct MemoryBackend {
    entries: Cache<String, MemoryEntry>,
}

impl MemoryBackend {
    /// Create an empty backend holding at most `max_entries` keys.
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build();
        Self { entries }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                ttl,
                keep_ttl: false,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.get(key).is_some())
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let mut result = Err(PortcullisError::Cache {
            operation: "increment",
            message: "no value computed".to_string(),
        });

        let _ = self
            .entries
            .entry(key.to_string())
            .and_compute_with(|existing| {
                let (current, keep_ttl) = match existing {
                    Some(entry) => match entry.value().value.trim().parse::<i64>() {
                        Ok(n) => (n, true),
                        Err(_) => {
                            result = Err(PortcullisError::Cache {
                                operation: "increment",
                                message: "value is not an integer".to_string(),
                            });
                            return Op::Nop;
                        }
                    },
                    None => (0, false),
                };

                match current.checked_add(amount) {
                    Some(next) => {
                        result = Ok(next);
                        Op::Put(MemoryEntry {
                            value: next.to_string(),
                            ttl: None,
                            keep_ttl,
                        })
                    }
                    None => {
                        result = Err(PortcullisError::Cache {
                            operation: "increment",
                            message: "increment would overflow".to_string(),
                        });
                        Op::Nop
                    }
                }
            });

        result
    }

    async fn clear_pattern(&self, pattern: &str) -> Result<u64> {
        let matcher = Glob::new(pattern)
            .map_err(|e| PortcullisError::InvalidPattern(e.to_string()))?
            .compile_matcher();

        let matching: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(key, _)| matcher.is_match(key.as_str()))
            .map(|(key, _)| key)
            .collect();

        let mut removed = 0;
        for key in matching {
            if self.entries.remove(key.as_str()).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn admit_window(&self, key: &str, request: &WindowRequest) -> Result<WindowOutcome> {
        let mut outcome = Err(PortcullisError::Cache {
            operation: "admit_window",
            message: "no value computed".to_string(),
        });

        let _ = self
            .entries
            .entry(key.to_string())
            .and_compute_with(|existing| {
                // A corrupt sequence is treated as empty and overwritten.
                let stored: Vec<u64> = existing
                    .and_then(|entry| serde_json::from_str(&entry.into_value().value).ok())
                    .unwrap_or_default();

                let (next, observed) = request.apply(stored);
                let Some(timestamps) = next else {
                    outcome = Ok(observed);
                    return Op::Nop;
                };

                match serde_json::to_string(&timestamps) {
                    Ok(value) => {
                        outcome = Ok(observed);
                        Op::Put(MemoryEntry {
                            value,
                            ttl: Some(request.ttl),
                            keep_ttl: false,
                        })
                    }
                    Err(e) => {
                        outcome = Err(e.into());
                        Op::Nop
                    }
                }
            });

        outcome
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
