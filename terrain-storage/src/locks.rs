//! Named, expiring mutual-exclusion locks.
//!
//! A [`LockGuard`] is returned on acquisition and releases the lock when
//! dropped. Locks past their expiry may be taken over by another caller, so
//! a crashed holder never blocks a key for longer than the lock duration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use terrain_core::{
    expiry_after, Acquired, EntityIdType, Lock, LockData, LockError, LockId, TerrainConfig,
    TerrainResult,
};

/// Lock acquisition backend.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquire the lock for `key`, holding it for `duration`.
    ///
    /// Waits up to the service's acquire timeout for a contended key, then
    /// fails with [`LockError::AcquireTimeout`]. Durations too large to
    /// represent hold the lock until it is released.
    async fn acquire(&self, key: &str, duration: Duration, name: &str) -> TerrainResult<LockGuard>;
}

/// Backend side of a held lock. Implemented by lock services so guards can
/// renew or hand back the lock without knowing which backend issued it.
pub trait LockHandle: Send + Sync {
    fn release(&self, data: LockData);

    /// Replace the stored state of a held lock with `data`. Returns false if
    /// another caller has taken the key over.
    fn renew(&self, data: &LockData) -> bool;
}

/// A held lock. Dropping the guard releases it.
pub struct LockGuard {
    lock: Option<Lock<Acquired>>,
    handle: Arc<dyn LockHandle>,
}

impl LockGuard {
    pub fn new(lock: Lock<Acquired>, handle: Arc<dyn LockHandle>) -> Self {
        Self {
            lock: Some(lock),
            handle,
        }
    }

    pub fn lock(&self) -> Option<&Lock<Acquired>> {
        self.lock.as_ref()
    }

    pub fn key(&self) -> &str {
        self.lock.as_ref().map(|l| l.key()).unwrap_or_default()
    }

    /// Whether the lock has run past its expiry and may be taken over.
    pub fn is_expired(&self) -> bool {
        match &self.lock {
            Some(lock) => lock.is_expired(Utc::now()),
            None => true,
        }
    }

    /// Time left before the lock may be taken over.
    pub fn remaining(&self) -> Option<Duration> {
        self.lock.as_ref()?.remaining_duration(Utc::now())
    }

    /// Push the expiry out by `additional`.
    ///
    /// # Errors
    ///
    /// `LockError::NotHeld` if the lock expired and another caller took the
    /// key. The guard is spent after that and releases nothing on drop.
    pub fn extend(&mut self, additional: Duration) -> TerrainResult<()> {
        let Some(lock) = self.lock.take() else {
            return Err(LockError::NotHeld { key: String::new() }.into());
        };
        let extended = lock.extend(additional);
        if !self.handle.renew(extended.data()) {
            return Err(LockError::NotHeld {
                key: extended.key().to_string(),
            }
            .into());
        }
        self.lock = Some(extended);
        Ok(())
    }

    /// Release explicitly, returning the lock data.
    pub fn release(mut self) -> Option<LockData> {
        let data = self.lock.take()?.release();
        self.handle.release(data.clone());
        Some(data)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            self.handle.release(lock.release());
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("lock", &self.lock).finish()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashMap<String, LockData>>,
}

impl LockTable {
    /// Try once to take `key`. Expired holders are displaced.
    fn try_acquire(
        &self,
        key: &str,
        duration: Duration,
        name: &str,
    ) -> TerrainResult<Option<LockData>> {
        let mut held = self.held.lock().map_err(|_| LockError::Poisoned {
            key: key.to_string(),
        })?;
        let now = Utc::now();

        if let Some(existing) = held.get(key) {
            if !existing.is_expired(now) {
                return Ok(None);
            }
            tracing::debug!(key, previous = %existing.lock_id, "Displacing expired lock");
        }

        let data = LockData {
            lock_id: LockId::now_v7(),
            key: key.to_string(),
            name: name.to_string(),
            acquired_at: now,
            expires_at: expiry_after(now, duration),
        };
        held.insert(key.to_string(), data.clone());
        Ok(Some(data))
    }
}

impl LockHandle for LockTable {
    fn release(&self, data: LockData) {
        let Ok(mut held) = self.held.lock() else {
            tracing::warn!(key = %data.key, "Lock table poisoned; lock left to expire");
            return;
        };
        // Only the current holder may release; a displaced holder must not
        // free the lock its successor now owns.
        if held
            .get(&data.key)
            .is_some_and(|current| current.lock_id == data.lock_id)
        {
            held.remove(&data.key);
        }
    }

    fn renew(&self, data: &LockData) -> bool {
        let Ok(mut held) = self.held.lock() else {
            return false;
        };
        match held.get_mut(&data.key) {
            Some(current) if current.lock_id == data.lock_id => {
                current.expires_at = data.expires_at;
                true
            }
            _ => false,
        }
    }
}

/// Process-local lock service.
#[derive(Debug, Clone)]
pub struct InMemoryLockService {
    table: Arc<LockTable>,
    acquire_timeout: Duration,
    retry_interval: Duration,
}

impl InMemoryLockService {
    /// A zero `acquire_timeout` means a single attempt.
    pub fn new(acquire_timeout: Duration, retry_interval: Duration) -> Self {
        Self {
            table: Arc::new(LockTable::default()),
            acquire_timeout,
            retry_interval,
        }
    }

    pub fn from_config(config: &TerrainConfig) -> Self {
        Self::new(config.lock_acquire_timeout, config.lock_retry_interval)
    }

    /// Whether `key` is currently held by an unexpired lock.
    pub fn is_held(&self, key: &str) -> bool {
        self.table
            .held
            .lock()
            .map(|held| held.get(key).is_some_and(|d| !d.is_expired(Utc::now())))
            .unwrap_or(false)
    }
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new(Duration::ZERO, Duration::from_millis(25))
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(
        &self,
        key: &str,
        duration: Duration,
        name: &str,
    ) -> TerrainResult<LockGuard> {
        let deadline = tokio::time::Instant::now() + self.acquire_timeout;

        loop {
            if let Some(data) = self.table.try_acquire(key, duration, name)? {
                let handle: Arc<dyn LockHandle> = self.table.clone();
                return Ok(LockGuard::new(Lock::new(data), handle));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::debug!(key, name, "Lock contended; giving up");
                return Err(LockError::AcquireTimeout {
                    key: key.to_string(),
                    timeout: self.acquire_timeout,
                }
                .into());
            }
            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }
}
