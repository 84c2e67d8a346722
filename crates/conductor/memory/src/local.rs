//! In-process memory backend.
//!
//! Three isolated scopes, per-entry expiry with lazy cleanup, and a
//! bounded failure-pattern log.

use crate::entry::{FailurePattern, MemoryEntry, MemoryScope};
use crate::Memory;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Configuration for [`LocalMemory`].
#[derive(Clone, Debug)]
pub struct LocalMemoryConfig {
    /// Lifetime of a stored entry (default: 24 hours)
    pub entry_ttl: Duration,
    /// Failure log size that triggers trimming (default: 1000)
    pub max_failure_patterns: usize,
    /// Entries kept after trimming, most recent first (default: 500)
    pub retained_failure_patterns: usize,
}

impl Default for LocalMemoryConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(24 * 60 * 60),
            max_failure_patterns: 1000,
            retained_failure_patterns: 500,
        }
    }
}

/// Memory held in process.
pub struct LocalMemory {
    config: LocalMemoryConfig,
    scopes: RwLock<HashMap<MemoryScope, HashMap<String, MemoryEntry>>>,
    failures: Mutex<Vec<FailurePattern>>,
}

impl LocalMemory {
    pub fn new(config: LocalMemoryConfig) -> Self {
        Self {
            config,
            scopes: RwLock::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Drop expired entries from one scope.
    fn purge_expired(&self, scope: MemoryScope) {
        let now = Utc::now();
        let mut scopes = self.scopes.write();
        if let Some(entries) = scopes.get_mut(&scope) {
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired_at(now));
            let removed = before - entries.len();
            if removed > 0 {
                debug!(?scope, removed, "Expired memory entries purged");
            }
        }
    }

    pub fn len(&self, scope: MemoryScope) -> usize {
        self.purge_expired(scope);
        self.scopes.read().get(&scope).map(HashMap::len).unwrap_or(0)
    }

    pub fn clear(&self, scope: MemoryScope) {
        self.scopes.write().remove(&scope);
    }
}

impl Default for LocalMemory {
    fn default() -> Self {
        Self::new(LocalMemoryConfig::default())
    }
}

#[async_trait]
impl Memory for LocalMemory {
    async fn store(&self, key: &str, value: Value, scope: MemoryScope) {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.config.entry_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        let entry = MemoryEntry {
            key: key.to_string(),
            value,
            scope,
            stored_at: now,
            expires_at: now + ttl,
        };
        self.scopes
            .write()
            .entry(scope)
            .or_default()
            .insert(key.to_string(), entry);
    }

    async fn retrieve(&self, key: &str, scope: MemoryScope) -> Option<Value> {
        self.purge_expired(scope);
        self.scopes
            .read()
            .get(&scope)
            .and_then(|entries| entries.get(key))
            .map(|e| e.value.clone())
    }

    async fn search(&self, query: &str, scope: MemoryScope) -> Vec<MemoryEntry> {
        self.purge_expired(scope);
        let needle = query.to_lowercase();
        let mut hits: Vec<MemoryEntry> = self
            .scopes
            .read()
            .get(&scope)
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| e.matches(&needle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| a.key.cmp(&b.key));
        hits
    }

    async fn record_failure_pattern(&self, pattern: Value) {
        let mut failures = self.failures.lock();
        failures.push(FailurePattern {
            recorded_at: Utc::now(),
            pattern,
        });
        if failures.len() > self.config.max_failure_patterns {
            let keep = self.config.retained_failure_patterns.min(failures.len());
            let drop = failures.len() - keep;
            failures.drain(..drop);
            debug!(kept = keep, "Failure pattern log trimmed");
        }
    }

    async fn failure_patterns(&self) -> Vec<FailurePattern> {
        self.failures.lock().clone()
    }
}
