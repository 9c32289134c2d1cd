//! Uniform `{ success, data?, error? }` result envelope.
//!
//! Every public coordination operation can be exposed through
//! [`ServiceResult`] so callers branch on `success` instead of matching on
//! error types. The `error.kind` field keeps the failure families apart:
//! a [`FailureKind::Logical`] failure (lock contention, expired presence,
//! no job ready) is an expected outcome, while
//! [`FailureKind::Infrastructure`] means the shared store misbehaved.
//! [`FailureKind::Operation`] is reserved for helpers such as `with_lock`
//! that run caller code and report its failure.

use serde::{Deserialize, Serialize};

/// Which family a failed operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Expected non-outcome, e.g. the lock is held by someone else.
    Logical,
    /// The store was unreachable, timed out, or returned garbage.
    Infrastructure,
    /// A caller-supplied operation run under coordination failed on its own.
    Operation,
}

/// Failure detail attached to an unsuccessful [`ServiceResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceError {
    pub kind: FailureKind,
    pub message: String,
}

/// The `{ success, data?, error? }` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl<T> ServiceResult<T> {
    /// A successful result carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// An expected, non-exceptional failure.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Logical, message)
    }

    /// A logical failure that still carries the outcome, e.g.
    /// `{acquired: false}` for a contended lock.
    pub fn rejected_with(data: T, message: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            ..Self::failure(FailureKind::Logical, message)
        }
    }

    /// A failure caused by the underlying infrastructure.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Infrastructure, message)
    }

    /// An infrastructure failure that still carries what was gathered
    /// before the store gave out.
    pub fn unavailable_with(data: T, message: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            ..Self::failure(FailureKind::Infrastructure, message)
        }
    }

    /// The wrapped caller operation failed.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Operation, message)
    }

    fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ServiceError {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Wrap a store-level `Result`: `Ok` becomes success, `Err` becomes an
    /// infrastructure failure.
    pub fn from_store<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::unavailable(e.to_string()),
        }
    }

    /// `true` if the operation failed for an expected, logical reason.
    pub fn is_logical_failure(&self) -> bool {
        matches!(
            self.error,
            Some(ServiceError {
                kind: FailureKind::Logical,
                ..
            })
        )
    }

    /// `true` if the operation failed because of the infrastructure.
    pub fn is_infrastructure_failure(&self) -> bool {
        matches!(
            self.error,
            Some(ServiceError {
                kind: FailureKind::Infrastructure,
                ..
            })
        )
    }

    /// Map the carried data, preserving the failure if any.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ServiceResult<U> {
        ServiceResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
        }
    }

    /// Convert back into a standard `Result`.
    pub fn into_result(self) -> Result<Option<T>, ServiceError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn ok_result_serializes_without_error_field() {
        let result = ServiceResult::ok(serde_json::json!({ "acquired": true }));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["acquired"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn rejected_result_is_logical() {
        let result: ServiceResult<()> = ServiceResult::rejected("lock is held");
        assert!(!result.success);
        assert!(result.is_logical_failure());
        assert!(!result.is_infrastructure_failure());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"]["kind"], "logical");
        assert_eq!(json["error"]["message"], "lock is held");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn from_store_error_is_infrastructure() {
        let result: ServiceResult<u32> = ServiceResult::from_store(Err::<u32, _>("connection refused"));
        assert!(result.is_infrastructure_failure());
        assert_matches!(result.into_result(), Err(ServiceError { kind: FailureKind::Infrastructure, .. }));
    }

    #[test]
    fn unavailable_with_keeps_data_and_infrastructure_kind() {
        let result = ServiceResult::unavailable_with(vec!["partial"], "store down");
        assert!(result.is_infrastructure_failure());
        assert_eq!(result.data, Some(vec!["partial"]));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "infrastructure");
    }

    #[test]
    fn map_preserves_failure() {
        let result: ServiceResult<u32> = ServiceResult::rejected("nope");
        let mapped = result.map(|n| n * 2);
        assert!(mapped.is_logical_failure());
        assert!(mapped.data.is_none());

        let mapped = ServiceResult::ok(21).map(|n| n * 2);
        assert_eq!(mapped.data, Some(42));
    }
}
