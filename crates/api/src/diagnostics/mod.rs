//! End-to-end self-test of the coordination services.
//!
//! `GET /api/v1/diagnostics?feature=...` runs a small scripted scenario per
//! component against the live store and reports each check separately.
//! Every run uses fresh ids so concurrent runs and real traffic never
//! collide.
//!
//! Overall status:
//!
//! | status    | meaning                                              |
//! |-----------|------------------------------------------------------|
//! | `passed`  | every check passed                                   |
//! | `partial` | at least one check failed                            |
//! | `failed`  | the store was unreachable before any check could run |

mod checks;

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Which component(s) to exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Locks,
    Presence,
    Pubsub,
    Queue,
    Integration,
    All,
}

impl Feature {
    fn components(self) -> &'static [Feature] {
        match self {
            Feature::Locks => &[Feature::Locks],
            Feature::Presence => &[Feature::Presence],
            Feature::Pubsub => &[Feature::Pubsub],
            Feature::Queue => &[Feature::Queue],
            Feature::Integration => &[Feature::Integration],
            Feature::All => &[
                Feature::Locks,
                Feature::Presence,
                Feature::Pubsub,
                Feature::Queue,
                Feature::Integration,
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::Locks => "locks",
            Feature::Presence => "presence",
            Feature::Pubsub => "pubsub",
            Feature::Queue => "queue",
            Feature::Integration => "integration",
            Feature::All => "all",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "locks" => Ok(Feature::Locks),
            "presence" => Ok(Feature::Presence),
            "pubsub" => Ok(Feature::Pubsub),
            "queue" => Ok(Feature::Queue),
            "integration" => Ok(Feature::Integration),
            "all" => Ok(Feature::All),
            other => Err(format!(
                "Unknown feature '{other}'; expected locks, presence, pubsub, queue, integration, or all"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Passed,
    Partial,
    Failed,
}

/// Result of one scripted check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub component: Feature,
    pub name: String,
    pub passed: bool,
    pub detail: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub feature: Feature,
    pub status: OverallStatus,
    pub passed: usize,
    pub failed: usize,
    pub checks: Vec<CheckOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiagnosticReport {
    fn hard_failure(feature: Feature, error: String) -> Self {
        Self {
            feature,
            status: OverallStatus::Failed,
            passed: 0,
            failed: 0,
            checks: Vec::new(),
            error: Some(error),
        }
    }

    fn from_checks(feature: Feature, checks: Vec<CheckOutcome>) -> Self {
        let passed = checks.iter().filter(|c| c.passed).count();
        let failed = checks.len() - passed;
        let status = if failed == 0 {
            OverallStatus::Passed
        } else {
            OverallStatus::Partial
        };
        Self {
            feature,
            status,
            passed,
            failed,
            checks,
            error: None,
        }
    }
}

/// Outcome of a single check: a short detail on success, the reason on
/// failure.
pub(crate) type CheckResult = Result<String, String>;

/// Run the checks selected by `feature`.
pub async fn run(state: &AppState, feature: Feature) -> DiagnosticReport {
    if let Err(e) = tabletop_store::health_check(&state.store).await {
        tracing::error!(%feature, error = %e, "Diagnostics aborted: store unreachable");
        return DiagnosticReport::hard_failure(feature, format!("Store unreachable: {e}"));
    }

    let run_id = uuid::Uuid::new_v4().simple().to_string();
    let mut outcomes = Vec::new();
    for &component in feature.components() {
        let results = match component {
            Feature::Locks => checks::locks(state, &run_id).await,
            Feature::Presence => checks::presence(state, &run_id).await,
            Feature::Pubsub => checks::pubsub(state, &run_id).await,
            Feature::Queue => checks::queue(state, &run_id).await,
            Feature::Integration => checks::integration(state, &run_id).await,
            Feature::All => Vec::new(),
        };
        for (name, duration_ms, result) in results {
            let (passed, detail) = match result {
                Ok(detail) => (true, detail),
                Err(reason) => (false, reason),
            };
            if !passed {
                tracing::warn!(component = %component, check = name, detail = %detail, "Diagnostic check failed");
            }
            outcomes.push(CheckOutcome {
                component,
                name: name.to_string(),
                passed,
                detail,
                duration_ms,
            });
        }
    }

    let report = DiagnosticReport::from_checks(feature, outcomes);
    tracing::info!(
        %feature,
        passed = report.passed,
        failed = report.failed,
        "Diagnostics complete"
    );
    report
}

/// Time a check and tag it with its name.
pub(crate) async fn timed<F>(name: &'static str, check: F) -> (&'static str, u64, CheckResult)
where
    F: std::future::Future<Output = CheckResult>,
{
    let started = Instant::now();
    let result = check.await;
    (name, started.elapsed().as_millis() as u64, result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(passed: bool) -> CheckOutcome {
        CheckOutcome {
            component: Feature::Locks,
            name: "x".into(),
            passed,
            detail: String::new(),
            duration_ms: 0,
        }
    }

    #[test]
    fn feature_parses_case_insensitively() {
        assert_eq!("PubSub".parse::<Feature>().unwrap(), Feature::Pubsub);
        assert_eq!("all".parse::<Feature>().unwrap(), Feature::All);
        assert!("metrics".parse::<Feature>().is_err());
    }

    #[test]
    fn all_expands_to_every_component() {
        assert_eq!(Feature::All.components().len(), 5);
        assert_eq!(Feature::Queue.components(), &[Feature::Queue]);
    }

    #[test]
    fn status_reflects_failures() {
        let report = DiagnosticReport::from_checks(Feature::Locks, vec![outcome(true), outcome(true)]);
        assert_eq!(report.status, OverallStatus::Passed);

        let report = DiagnosticReport::from_checks(Feature::Locks, vec![outcome(true), outcome(false)]);
        assert_eq!(report.status, OverallStatus::Partial);
        assert_eq!(report.failed, 1);

        let report = DiagnosticReport::hard_failure(Feature::All, "down".into());
        assert_eq!(report.status, OverallStatus::Failed);
        assert!(report.checks.is_empty());
    }
}
