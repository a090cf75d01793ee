//! Singleton aggregate counters.
//!
//! The counters live in exactly one logical row. [`CounterStore`] mutates it
//! with an optimistic read-modify-write against a [`CounterRow`] backend: the
//! row carries a version, a write only lands if the version it read is still
//! current, and conflicting writers retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error};

/// Default number of attempts for one counter update.
pub const DEFAULT_MAX_RETRIES: u32 = 64;

/// Aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub live_threats: u64,
    pub threats_blocked_today: u64,
    pub ai_decisions_hour: u64,
    pub quantum_keys_active: u64,
}

impl Default for Counters {
    /// Seed values used when the row is first created.
    fn default() -> Self {
        Self {
            live_threats: 302_928,
            threats_blocked_today: 298_193,
            ai_decisions_hour: 2_495,
            quantum_keys_active: 855,
        }
    }
}

/// Counters plus the row version they were read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedCounters {
    pub version: u64,
    pub counters: Counters,
}

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter update still conflicting after {attempts} attempts")]
    Contention { attempts: u32 },
    #[error("counter backend error: {0}")]
    Backend(String),
}

/// Durable storage for the counters row.
#[async_trait]
pub trait CounterRow: Send + Sync {
    /// Read the row, if it exists.
    async fn load(&self) -> Result<Option<VersionedCounters>, CounterError>;

    /// Write `counters` if the row is still at `expected` (`None` meaning the
    /// row must not exist yet). Returns `false` on a version conflict.
    async fn compare_and_store(
        &self,
        expected: Option<u64>,
        counters: Counters,
    ) -> Result<bool, CounterError>;
}

/// In-process counters row.
#[derive(Debug, Default)]
pub struct MemoryCounterRow {
    row: Mutex<Option<VersionedCounters>>,
}

impl MemoryCounterRow {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterRow for MemoryCounterRow {
    async fn load(&self) -> Result<Option<VersionedCounters>, CounterError> {
        let row = self
            .row
            .lock()
            .map_err(|_| CounterError::Backend("counter row lock poisoned".to_string()))?;
        Ok(*row)
    }

    async fn compare_and_store(
        &self,
        expected: Option<u64>,
        counters: Counters,
    ) -> Result<bool, CounterError> {
        let mut row = self
            .row
            .lock()
            .map_err(|_| CounterError::Backend("counter row lock poisoned".to_string()))?;

        let current = row.as_ref().map(|r| r.version);
        if current != expected {
            return Ok(false);
        }

        *row = Some(VersionedCounters {
            version: current.map_or(1, |v| v + 1),
            counters,
        });
        Ok(true)
    }
}

/// Serialized access to the counters row.
pub struct CounterStore {
    row: Arc<dyn CounterRow>,
    seed: Counters,
    max_retries: u32,
}

impl CounterStore {
    pub fn new(row: Arc<dyn CounterRow>, seed: Counters, max_retries: u32) -> Self {
        Self {
            row,
            seed,
            max_retries: max_retries.max(1),
        }
    }

    /// In-memory store with the default seed.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryCounterRow::new()),
            Counters::default(),
            DEFAULT_MAX_RETRIES,
        )
    }

    /// Record one decision, counting it as blocked when denied.
    pub async fn increment_decision(&self, is_denied: bool) -> Result<Counters, CounterError> {
        self.update(|c| {
            c.ai_decisions_hour += 1;
            if is_denied {
                c.threats_blocked_today += 1;
            }
        })
        .await
    }

    /// Record one freshly generated key.
    pub async fn increment_keys_active(&self) -> Result<Counters, CounterError> {
        self.update(|c| c.quantum_keys_active += 1).await
    }

    /// Current counters, creating the row from the seed if absent.
    pub async fn snapshot(&self) -> Result<Counters, CounterError> {
        for _ in 0..self.max_retries {
            if let Some(current) = self.row.load().await? {
                return Ok(current.counters);
            }
            if self.row.compare_and_store(None, self.seed).await? {
                debug!("Counters row created from seed");
                return Ok(self.seed);
            }
        }
        Err(self.exhausted())
    }

    async fn update<F>(&self, mutate: F) -> Result<Counters, CounterError>
    where
        F: Fn(&mut Counters) + Send + Sync,
    {
        for attempt in 1..=self.max_retries {
            let current = self.row.load().await?;
            let (expected, mut counters) = match current {
                Some(row) => (Some(row.version), row.counters),
                None => (None, self.seed),
            };
            mutate(&mut counters);

            if self.row.compare_and_store(expected, counters).await? {
                return Ok(counters);
            }

            debug!(attempt, "Counter update conflicted, retrying");
            tokio::task::yield_now().await;
        }
        Err(self.exhausted())
    }

    fn exhausted(&self) -> CounterError {
        error!(attempts = self.max_retries, "Counter update retries exhausted");
        CounterError::Contention {
            attempts: self.max_retries,
        }
    }
}
