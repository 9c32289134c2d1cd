//! Distributed lock service.
//!
//! A lock is a single store key `{prefix}:lock:{id}` whose value is the
//! holder token and whose TTL is the lease. Acquisition is `SET NX PX`,
//! release is compare-and-delete, extension is compare-and-extend, so at
//! most one holder exists per id as observed by the store, and a crashed
//! holder can never block others for longer than its lease.
//!
//! Contention is a normal outcome: [`LockService::acquire_lock`] reports
//! `acquired: false` rather than an error. Out-of-range options surface as
//! [`LockError::Invalid`] and store failures as [`StoreError`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tabletop_core::coordination::{
    validate_id, validate_lease_duration, validate_lock_retry, DEFAULT_LEASE_DURATION_MS,
};
use tabletop_core::error::{panic_message, CoreError};
use tabletop_core::keys::KeySpace;
use tabletop_core::result::ServiceResult;
use tabletop_core::types::Timestamp;
use tabletop_store::{KeyValueStore, StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A lease currently held on a named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub id: String,
    pub holder: String,
    pub acquired_at: Timestamp,
    pub lease_duration_ms: u64,
    pub expires_at: Timestamp,
}

/// Acquisition parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    pub lease_duration_ms: u64,
    /// Additional attempts after the first one fails on contention.
    pub retry_attempts: u32,
    /// Pause between attempts.
    pub retry_delay_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            retry_attempts: 0,
            retry_delay_ms: 0,
        }
    }
}

impl LockOptions {
    pub fn with_lease(lease_duration_ms: u64) -> Self {
        Self {
            lease_duration_ms,
            ..Self::default()
        }
    }

    pub fn retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }

    /// Check the lease and retry bounds. Nothing is clamped: a lease is
    /// exactly `lease_duration_ms` or the request is rejected.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_lease_duration(self.lease_duration_ms)?;
        validate_lock_retry(self.retry_attempts, self.retry_delay_ms)
    }
}

/// Failure of [`LockService::acquire_lock`].
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The request was rejected before touching the store.
    #[error("invalid lock request: {0}")]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type LockResult<T> = Result<T, LockError>;

/// Result of [`LockService::acquire_lock`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockAcquisition {
    pub acquired: bool,
    pub lock_id: Option<String>,
    pub lock: Option<Lock>,
}

impl LockAcquisition {
    fn denied() -> Self {
        Self {
            acquired: false,
            lock_id: None,
            lock: None,
        }
    }
}

/// Result of [`LockService::release_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRelease {
    pub released: bool,
}

/// Result of [`LockService::extend_lock`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockExtension {
    pub extended: bool,
    pub new_expires_at: Option<Timestamp>,
}

/// Result of [`LockService::get_lock_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockStatus {
    pub exists: bool,
    pub holder: Option<String>,
    pub expires_at: Option<Timestamp>,
}

/// Failure of [`LockService::try_with_lock`].
#[derive(Debug, thiserror::Error)]
pub enum LockedCallError<E> {
    /// Someone else holds the lock; the operation was not run.
    #[error("lock {lock_id} is held by another holder")]
    NotAcquired { lock_id: String },

    /// The lock id or options were rejected; the operation was not run.
    #[error("invalid lock request: {0}")]
    Invalid(CoreError),

    /// The store failed while acquiring the lock.
    #[error(transparent)]
    Store(StoreError),

    /// The operation ran and returned an error. The lock was released.
    #[error("operation failed: {0}")]
    Operation(E),

    /// The operation panicked. The lock was released.
    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl<E> From<LockError> for LockedCallError<E> {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Invalid(core) => Self::Invalid(core),
            LockError::Store(store) => Self::Store(store),
        }
    }
}

fn expires_in(ttl: Duration) -> Timestamp {
    chrono::Utc::now() + chrono::Duration::milliseconds(ttl.as_millis() as i64)
}

// ---------------------------------------------------------------------------
// LockService
// ---------------------------------------------------------------------------

/// Mutual exclusion over named resources.
///
/// Cheap to clone; holds no state beyond the injected store.
#[derive(Clone)]
pub struct LockService {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
}

impl LockService {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Try to take the lease on `lock_id` for `holder`.
    ///
    /// Makes `1 + retry_attempts` attempts, sleeping `retry_delay_ms`
    /// between them. Returns `acquired: false` when every attempt found the
    /// lock held. Options outside the bounds checked by
    /// [`LockOptions::validate`] are rejected with [`LockError::Invalid`].
    pub async fn acquire_lock(
        &self,
        lock_id: &str,
        holder: &str,
        options: &LockOptions,
    ) -> LockResult<LockAcquisition> {
        validate_id("lock_id", lock_id)?;
        options.validate()?;

        let key = self.keys.lock(lock_id);
        let lease = Duration::from_millis(options.lease_duration_ms);
        let retries = options.retry_attempts;
        let delay = Duration::from_millis(options.retry_delay_ms);

        for attempt in 0..=retries {
            if attempt > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let acquired_at = chrono::Utc::now();
            if self.store.set_if_absent(&key, holder, lease).await? {
                let lock = Lock {
                    id: lock_id.to_string(),
                    holder: holder.to_string(),
                    acquired_at,
                    lease_duration_ms: lease.as_millis() as u64,
                    expires_at: acquired_at
                        + chrono::Duration::milliseconds(lease.as_millis() as i64),
                };
                tracing::debug!(
                    lock_id,
                    holder,
                    attempt,
                    lease_ms = lock.lease_duration_ms,
                    "Lock acquired"
                );
                return Ok(LockAcquisition {
                    acquired: true,
                    lock_id: Some(lock_id.to_string()),
                    lock: Some(lock),
                });
            }
        }

        tracing::debug!(lock_id, holder, attempts = retries + 1, "Lock contended");
        Ok(LockAcquisition::denied())
    }

    /// Release `lock_id` if and only if `holder` still holds it.
    pub async fn release_lock(&self, lock_id: &str, holder: &str) -> StoreResult<LockRelease> {
        let released = self
            .store
            .compare_and_delete(&self.keys.lock(lock_id), holder)
            .await?;
        if released {
            tracing::debug!(lock_id, holder, "Lock released");
        } else {
            tracing::debug!(lock_id, holder, "Release ignored: not the current holder");
        }
        Ok(LockRelease { released })
    }

    /// Push the expiry of a held lease out by `additional`.
    pub async fn extend_lock(
        &self,
        lock_id: &str,
        holder: &str,
        additional: Duration,
    ) -> StoreResult<LockExtension> {
        let remaining = self
            .store
            .compare_and_extend(&self.keys.lock(lock_id), holder, additional)
            .await?;
        Ok(match remaining {
            Some(ttl) => {
                let new_expires_at = expires_in(ttl);
                tracing::debug!(lock_id, holder, %new_expires_at, "Lock extended");
                LockExtension {
                    extended: true,
                    new_expires_at: Some(new_expires_at),
                }
            }
            None => LockExtension {
                extended: false,
                new_expires_at: None,
            },
        })
    }

    /// Observe the current state of `lock_id` without touching it.
    pub async fn get_lock_status(&self, lock_id: &str) -> StoreResult<LockStatus> {
        let key = self.keys.lock(lock_id);
        let Some(holder) = self.store.get(&key).await? else {
            return Ok(LockStatus {
                exists: false,
                holder: None,
                expires_at: None,
            });
        };
        let expires_at = self.store.ttl(&key).await?.map(expires_in);
        Ok(LockStatus {
            exists: true,
            holder: Some(holder),
            expires_at,
        })
    }

    /// Acquire `lock_id` and return a guard that owns the lease.
    ///
    /// Returns `None` on contention.
    pub async fn acquire_guard(
        &self,
        lock_id: &str,
        holder: &str,
        options: &LockOptions,
    ) -> LockResult<Option<LockGuard>> {
        let acquisition = self.acquire_lock(lock_id, holder, options).await?;
        Ok(acquisition.lock.map(|lock| LockGuard {
            service: self.clone(),
            lock,
            released: AtomicBool::new(false),
        }))
    }

    /// Run `operation` while holding `lock_id`.
    ///
    /// A fresh holder token is generated for the call. The lock is released
    /// after `operation` finishes, whether it returned `Ok`, `Err`, or
    /// panicked. If the caller's future is dropped mid-flight the lease
    /// simply runs out.
    pub async fn try_with_lock<F, Fut, T, E>(
        &self,
        lock_id: &str,
        options: &LockOptions,
        operation: F,
    ) -> Result<T, LockedCallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let holder = format!("scoped:{}", uuid::Uuid::new_v4());
        let acquisition = self.acquire_lock(lock_id, &holder, options).await?;
        if !acquisition.acquired {
            return Err(LockedCallError::NotAcquired {
                lock_id: lock_id.to_string(),
            });
        }

        let outcome = AssertUnwindSafe(operation()).catch_unwind().await;

        if let Err(e) = self.release_lock(lock_id, &holder).await {
            tracing::warn!(
                lock_id,
                error = %e,
                "Failed to release scoped lock; lease will expire on its own"
            );
        }

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LockedCallError::Operation(e)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(lock_id, panic = %message, "Operation under lock panicked");
                Err(LockedCallError::Panicked(message))
            }
        }
    }

    /// [`try_with_lock`](Self::try_with_lock) folded into the uniform
    /// result envelope.
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        lock_id: &str,
        options: &LockOptions,
        operation: F,
    ) -> ServiceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match self.try_with_lock(lock_id, options, operation).await {
            Ok(value) => ServiceResult::ok(value),
            Err(e @ LockedCallError::NotAcquired { .. }) => ServiceResult::rejected(e.to_string()),
            Err(e @ LockedCallError::Invalid(_)) => ServiceResult::rejected(e.to_string()),
            Err(LockedCallError::Store(e)) => {
                tracing::error!(lock_id, error = %e, "Store error while acquiring lock");
                ServiceResult::unavailable(e.to_string())
            }
            Err(e) => ServiceResult::operation_failed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// LockGuard
// ---------------------------------------------------------------------------

/// Owned lease returned by [`LockService::acquire_guard`].
///
/// Call [`release`](Self::release) when done. A guard dropped without an
/// explicit release schedules a best-effort release on the current Tokio
/// runtime; if there is none, the lease expires on its own.
pub struct LockGuard {
    service: LockService,
    lock: Lock,
    released: AtomicBool,
}

impl LockGuard {
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn lock_id(&self) -> &str {
        &self.lock.id
    }

    pub fn holder(&self) -> &str {
        &self.lock.holder
    }

    /// Extend the lease; `false` means the lease was already lost.
    pub async fn extend(&mut self, additional: Duration) -> StoreResult<bool> {
        let extension = self
            .service
            .extend_lock(&self.lock.id, &self.lock.holder, additional)
            .await?;
        if let Some(expires_at) = extension.new_expires_at {
            self.lock.expires_at = expires_at;
        }
        Ok(extension.extended)
    }

    /// Release the lease. Returns `false` if it had already expired or been
    /// taken over. On a store error the guard's drop still schedules a
    /// release.
    pub async fn release(self) -> StoreResult<bool> {
        let release = self
            .service
            .release_lock(&self.lock.id, &self.lock.holder)
            .await?;
        self.released.store(true, Ordering::SeqCst);
        Ok(release.released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let service = self.service.clone();
        let lock_id = self.lock.id.clone();
        let holder = self.lock.holder.clone();
        runtime.spawn(async move {
            if let Err(e) = service.release_lock(&lock_id, &holder).await {
                tracing::warn!(lock_id = %lock_id, error = %e, "Deferred lock release failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
