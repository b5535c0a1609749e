//! Lock typestate for compile-time safety of lock lifecycle.
//!
//! A lock can only be extended or released while it is in the `Acquired`
//! state. Releasing consumes the lock.
//!
//! # State Transition Diagram
//!
//! ```text
//! (unlocked) ─── acquire() ──→ Acquired ─── release() ──→ (unlocked)
//!                                  │
//!                             extend() ↺
//! ```

use crate::{LockId, Timestamp};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// Instant `duration` after `from`, saturating at the latest representable
/// timestamp instead of wrapping.
pub fn expiry_after(from: Timestamp, duration: Duration) -> Timestamp {
    let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
    from.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ============================================================================
// LOCK DATA (state-independent)
// ============================================================================

/// Data describing a held named lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockData {
    pub lock_id: LockId,
    /// Resource key, e.g. `workflow-engine-project-error-detector:{project_id}`.
    pub key: String,
    /// Logical lock name used for grouping in logs.
    pub name: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LockData {
    /// Check if the lock has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lock states.
pub trait LockState: private::Sealed + Send + Sync {}

/// Lock is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired;
impl LockState for Acquired {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Acquired {}
}

// ============================================================================
// LOCK TYPESTATE WRAPPER
// ============================================================================

/// A lock with compile-time state tracking.
#[derive(Debug, Clone)]
pub struct Lock<S: LockState> {
    data: LockData,
    _state: PhantomData<S>,
}

impl<S: LockState> Lock<S> {
    /// Access the underlying lock data (read-only).
    pub fn data(&self) -> &LockData {
        &self.data
    }

    pub fn lock_id(&self) -> LockId {
        self.data.lock_id
    }

    pub fn key(&self) -> &str {
        &self.data.key
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn expires_at(&self) -> Timestamp {
        self.data.expires_at
    }
}

impl Lock<Acquired> {
    /// Create a new acquired lock from data.
    ///
    /// This should only be called when a lock is successfully acquired.
    pub fn new(data: LockData) -> Self {
        Lock {
            data,
            _state: PhantomData,
        }
    }

    /// Extend the lock duration, consuming the original lock.
    pub fn extend(mut self, additional: Duration) -> Self {
        self.data.expires_at = expiry_after(self.data.expires_at, additional);
        self
    }

    /// Release the lock and return the underlying data.
    pub fn release(self) -> LockData {
        self.data
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.data.is_expired(now)
    }

    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        self.data.remaining_duration(now)
    }
}

impl fmt::Display for Lock<Acquired> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) until {}", self.data.key, self.data.name, self.data.expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityIdType;

    fn make_lock_data() -> LockData {
        let now = Utc::now();
        LockData {
            lock_id: LockId::now_v7(),
            key: "workflow-engine-project-error-detector:1".to_string(),
            name: "workflow_engine_issue_alert".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(10),
        }
    }

    #[test]
    fn test_lock_extend() {
        let data = make_lock_data();
        let original_expires = data.expires_at;
        let lock = Lock::<Acquired>::new(data);

        let extended = lock.extend(Duration::from_secs(60));
        assert!(extended.expires_at() > original_expires);
    }

    #[test]
    fn test_lock_extend_saturates() {
        let lock = Lock::<Acquired>::new(make_lock_data());

        let extended = lock.extend(Duration::MAX);
        assert_eq!(extended.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!extended.is_expired(Utc::now()));

        let again = extended.extend(Duration::from_secs(1));
        assert_eq!(again.expires_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_expiry_after_huge_durations() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        // Fits in a TimeDelta but not in the calendar range.
        let far = Duration::from_secs(i64::MAX as u64 / 1_000);
        assert_eq!(expiry_after(now, far), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            expiry_after(now, Duration::from_secs(10)),
            now + chrono::Duration::seconds(10)
        );
    }

    #[test]
    fn test_lock_release_consumes() {
        let data = make_lock_data();
        let lock = Lock::<Acquired>::new(data.clone());

        let released_data = lock.release();
        assert_eq!(released_data.lock_id, data.lock_id);
    }

    #[test]
    fn test_lock_expiry() {
        let data = make_lock_data();
        let lock = Lock::<Acquired>::new(data.clone());
        assert!(!lock.is_expired(data.acquired_at));
        assert!(lock.is_expired(data.expires_at));
        assert!(lock.remaining_duration(data.expires_at).is_none());
        assert!(lock.remaining_duration(data.acquired_at).is_some());
    }
}
