//! Lock and presence services on top of the shared store.

pub mod lock;
pub mod presence;

pub use lock::{
    Lock, LockAcquisition, LockError, LockExtension, LockGuard, LockOptions, LockRelease,
    LockResult, LockService, LockStatus, LockedCallError,
};
pub use presence::{
    ParticipantProfile, PresenceEntry, PresenceHandle, PresenceJoin, PresenceLeave,
    PresenceService, PresenceUpdate, RoleInfo,
};
