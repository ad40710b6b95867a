//! Drift classification primitives.
//!
//! This library holds the I/O-free half of the reconciliation sweep: given
//! what was observed about one instance (is there a broker record, does the
//! provider resource exist, does the platform still own the instance), decide
//! which drift class applies and what the sweeper is allowed to do about it.
//!
//! # Invariants
//!
//! - Classification is deterministic given the same observation
//! - Destructive repair is only ever chosen when both sides of the record
//!   are confirmed gone, or the record already failed its own deletion
//! - An observation with any unknown component never yields a repair

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Unrecognised repair policy string.
    #[error("unknown stale record action: {0}")]
    UnknownAction(String),
}

/// Whether something was observed to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Confirmed to exist.
    Present,

    /// Confirmed not to exist.
    Absent,

    /// The lookup failed; nothing can be concluded.
    Unknown,
}

impl Presence {
    /// Build a presence from a lookup that may have failed.
    pub fn from_lookup<E>(result: &Result<bool, E>) -> Self {
        match result {
            Ok(true) => Self::Present,
            Ok(false) => Self::Absent,
            Err(_) => Self::Unknown,
        }
    }
}

/// One observation of an instance across the three sources of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// The broker holds a record for the instance.
    pub record: bool,

    /// The provider resource backing the instance.
    pub provider: Presence,

    /// The platform's own ownership record of the instance.
    pub platform: Presence,
}

/// Drift classes recognised by the sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftClass {
    /// Record, provider resource and platform ownership agree.
    InSync,

    /// Record and provider resource exist but the platform no longer owns
    /// the instance.
    OrphanedResource,

    /// Record and platform ownership exist but the provider resource is gone.
    StaleRecord,

    /// Only the record remains; provider resource and ownership are gone.
    Abandoned,

    /// A broker-managed provider resource with no record.
    UntrackedResource,

    /// Some lookup failed, so the instance cannot be classified this pass.
    Indeterminate,
}

impl DriftClass {
    /// Returns true if the class represents any divergence.
    pub fn is_drift(&self) -> bool {
        !matches!(self, Self::InSync | Self::Indeterminate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InSync => "in_sync",
            Self::OrphanedResource => "orphaned_resource",
            Self::StaleRecord => "stale_record",
            Self::Abandoned => "abandoned",
            Self::UntrackedResource => "untracked_resource",
            Self::Indeterminate => "indeterminate",
        }
    }
}

impl fmt::Display for DriftClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an observation.
pub fn classify(observation: Observation) -> DriftClass {
    use Presence::*;

    if !observation.record {
        return match observation.provider {
            Present => DriftClass::UntrackedResource,
            Absent => DriftClass::InSync,
            Unknown => DriftClass::Indeterminate,
        };
    }

    match (observation.provider, observation.platform) {
        (Present, Present) => DriftClass::InSync,
        (Present, Absent) => DriftClass::OrphanedResource,
        (Absent, Present) => DriftClass::StaleRecord,
        (Absent, Absent) => DriftClass::Abandoned,
        (Unknown, _) | (_, Unknown) => DriftClass::Indeterminate,
    }
}

/// What the sweeper does about one finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Nothing to do.
    None,

    /// Surface the finding for an operator.
    Report,

    /// Delete the broker record. Never touches provider resources or
    /// platform ownership.
    RemoveRecord,
}

/// Handling of stale records (provider resource gone, platform still owns
/// the instance).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StaleRecordAction {
    #[default]
    Report,
    RemoveRecord,
}

impl FromStr for StaleRecordAction {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" => Ok(Self::Report),
            "remove-record" | "remove_record" => Ok(Self::RemoveRecord),
            other => Err(ReconcileError::UnknownAction(other.to_string())),
        }
    }
}

/// Repair policy applied to classified findings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairPolicy {
    pub stale_record: StaleRecordAction,
}

impl RepairPolicy {
    /// Decide the action for a finding.
    ///
    /// `deletion_failed` is true when the record's own lifecycle already
    /// ended in a failed deletion.
    pub fn decide(&self, class: DriftClass, deletion_failed: bool) -> RepairAction {
        match class {
            DriftClass::InSync | DriftClass::Indeterminate => RepairAction::None,
            DriftClass::Abandoned => RepairAction::RemoveRecord,
            DriftClass::StaleRecord if deletion_failed => RepairAction::RemoveRecord,
            DriftClass::StaleRecord => match self.stale_record {
                StaleRecordAction::Report => RepairAction::Report,
                StaleRecordAction::RemoveRecord => RepairAction::RemoveRecord,
            },
            DriftClass::OrphanedResource | DriftClass::UntrackedResource => RepairAction::Report,
        }
    }
}

/// Tracks repeated lookup failures so persistent ones can be escalated.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    /// Maximum failures tolerated per subject.
    max_retries: u32,

    /// Retry window duration.
    window: Duration,

    /// Tracked failures: subject -> (count, first_failure_time).
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RetryTracker {
    /// Create a new retry tracker.
    pub fn new(max_retries: u32, window: Duration) -> Self {
        Self {
            max_retries,
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for a subject.
    ///
    /// Returns true if retries are exhausted.
    pub fn record_failure(&mut self, subject: &str) -> bool {
        let now = Instant::now();

        let (count, first) = self
            .failures
            .entry(subject.to_string())
            .or_insert((0, now));

        // Reset if outside window
        if now.duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count += 1;
        *count > self.max_retries
    }

    /// Clear failure tracking for a subject (on success).
    pub fn clear(&mut self, subject: &str) {
        self.failures.remove(subject);
    }

    /// Prune expired entries.
    pub fn prune(&mut self) {
        let now = Instant::now();
        self.failures
            .retain(|_, (_, first)| now.duration_since(*first) <= self.window);
    }
}

/// Default sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default number of consecutive indeterminate passes before escalation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry window.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
