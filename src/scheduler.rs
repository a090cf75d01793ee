//! Periodic key rotation.
//!
//! The scheduler owns its task: [`KeyRotationScheduler::start`] spawns it and
//! [`KeyRotationHandle::stop`] shuts it down and waits for it to exit. Each
//! tick stores fresh key material and bumps `quantum_keys_active` through the
//! same [`CounterStore`] the decision path uses.

use crate::counters::{CounterError, CounterStore, Counters};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Generated key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub key_id: String,
    pub alg: String,
    /// Base64-encoded secret.
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("key generation failed: {0}")]
    Generate(String),
    #[error("key store error: {0}")]
    Store(String),
    #[error(transparent)]
    Counters(#[from] CounterError),
}

/// Produces new key material.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<KeyMaterial, RotationError>;
}

/// 256-bit random secrets.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomKeyGenerator;

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> Result<KeyMaterial, RotationError> {
        let secret: [u8; 32] = rand::random();
        let id: [u8; 8] = rand::random();
        let key_id = id.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        Ok(KeyMaterial {
            key_id,
            alg: "AES-256".to_string(),
            secret: STANDARD.encode(secret),
            created_at: Utc::now(),
        })
    }
}

/// Longest supported rotation period.
pub const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Storage for generated keys.
pub trait KeyStore: Send + Sync {
    fn insert(&self, key: KeyMaterial) -> Result<(), RotationError>;
}

/// In-process key store.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Mutex<Vec<KeyMaterial>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for MemoryKeyStore {
    fn insert(&self, key: KeyMaterial) -> Result<(), RotationError> {
        self.keys
            .lock()
            .map_err(|_| RotationError::Store("key store lock poisoned".to_string()))?
            .push(key);
        Ok(())
    }
}

/// Key rotation job.
#[derive(Clone)]
pub struct KeyRotationScheduler {
    counters: Arc<CounterStore>,
    keys: Arc<dyn KeyStore>,
    generator: Arc<dyn KeyGenerator>,
}

impl KeyRotationScheduler {
    pub fn new(
        counters: Arc<CounterStore>,
        keys: Arc<dyn KeyStore>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            counters,
            keys,
            generator,
        }
    }

    /// Generate and store one key, then count it.
    pub async fn rotate_once(&self) -> Result<Counters, RotationError> {
        let key = self.generator.generate()?;
        let key_id = key.key_id.clone();
        self.keys.insert(key)?;
        let counters = self.counters.increment_keys_active().await?;
        info!(
            key_id = %key_id,
            keys_active = counters.quantum_keys_active,
            "Rotated key"
        );
        Ok(counters)
    }

    /// Spawn the periodic task. The first rotation happens one interval
    /// after start. The period is clamped to `[1ms, MAX_PERIOD]`.
    pub fn start(self, period: Duration) -> KeyRotationHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let period = period.clamp(Duration::from_millis(1), MAX_PERIOD);

        let handle = tokio::spawn(async move {
            let now = Instant::now();
            let mut ticker = interval_at(now.checked_add(period).unwrap_or(now), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = period.as_secs(), "Key rotation scheduler started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.rotate_once().await {
                            warn!(error = %e, "Key rotation failed");
                        }
                    }
                }
            }
            info!("Key rotation scheduler stopped");
        });

        KeyRotationHandle {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

/// Owned lifecycle of a running scheduler.
pub struct KeyRotationHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeyRotationHandle {
    /// Signal shutdown and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Key rotation task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for KeyRotationHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
