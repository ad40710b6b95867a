//! Reconciliation sweeper.
//!
//! Cross-checks every record against the provider and the platform, and
//! lists broker-tagged provider resources that have no record. Findings are
//! reported; the only repair ever executed is removing a record whose
//! resource is confirmed gone (see `stratus_reconcile::RepairPolicy`).
//! Provider resources and platform ownership are never deleted here.

mod worker;

pub use worker::SweeperWorker;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stratus_reconcile::{
    classify, DriftClass, Observation, Presence, RepairAction, RepairPolicy, RetryTracker,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WINDOW,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::catalog::Tenancy;
use crate::platform::PlatformOwnership;
use crate::provider::{ResourceApi, SharedPoolApi};
use crate::record::{InstanceRecord, LifecycleStatus};
use crate::store::{InstanceStore, StoreError};
use crate::tags::BROKER_TAG_KEY;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to list records: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SweeperSettings {
    pub policy: RepairPolicy,
    /// Consecutive indeterminate passes before an instance is escalated.
    pub max_retries: u32,
    pub retry_window: Duration,
    /// Upper bound on each provider or platform lookup.
    pub lookup_timeout: Duration,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            policy: RepairPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_window: DEFAULT_RETRY_WINDOW,
            lookup_timeout: Duration::from_secs(60),
        }
    }
}

/// One drift observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// `None` for provider resources without a record.
    pub instance_id: Option<String>,
    pub resource: String,
    pub tenancy: Tenancy,
    pub status: Option<LifecycleStatus>,
    pub class: DriftClass,
    pub action: RepairAction,
    /// Whether the action was carried out.
    pub applied: bool,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_examined: usize,
    /// Records skipped because an operation is in flight.
    pub records_skipped: usize,
    pub records_removed: usize,
    pub findings: Vec<Finding>,
    /// Instances that stayed indeterminate past the retry budget.
    pub escalated: Vec<String>,
    /// Listings that failed; the untracked-resource scan is incomplete.
    pub errors: Vec<String>,
}

impl SweepReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            records_examined: 0,
            records_skipped: 0,
            records_removed: 0,
            findings: Vec::new(),
            escalated: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn findings_of(&self, class: DriftClass) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.class == class)
    }
}

pub struct Sweeper {
    store: Arc<dyn InstanceStore>,
    resources: Arc<dyn ResourceApi>,
    pool: Arc<dyn SharedPoolApi>,
    platform: Arc<dyn PlatformOwnership>,
    settings: SweeperSettings,
    retries: Mutex<RetryTracker>,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        resources: Arc<dyn ResourceApi>,
        pool: Arc<dyn SharedPoolApi>,
        platform: Arc<dyn PlatformOwnership>,
        settings: SweeperSettings,
    ) -> Self {
        let retries = RetryTracker::new(settings.max_retries, settings.retry_window);
        Self {
            store,
            resources,
            pool,
            platform,
            settings,
            retries: Mutex::new(retries),
        }
    }

    /// Run one pass over every record and provider resource.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::new();
        let records = self.store.list().await?;
        self.retries.lock().await.prune();

        for record in &records {
            if record.status.is_in_progress() {
                report.records_skipped += 1;
                continue;
            }
            report.records_examined += 1;
            self.examine(record, &mut report).await;
        }

        self.scan_untracked(&records, &mut report).await;

        report.finished_at = Utc::now();
        info!(
            examined = report.records_examined,
            skipped = report.records_skipped,
            findings = report.findings.len(),
            removed = report.records_removed,
            "Sweep complete"
        );
        Ok(report)
    }

    async fn examine(&self, record: &InstanceRecord, report: &mut SweepReport) {
        let provider = self.provider_presence(record).await;
        let platform = Presence::from_lookup(
            &self
                .bounded(self.platform.instance_exists(&record.instance_id))
                .await,
        );

        let class = classify(Observation {
            record: true,
            provider,
            platform,
        });

        {
            let mut retries = self.retries.lock().await;
            if class == DriftClass::Indeterminate {
                if retries.record_failure(&record.instance_id) {
                    warn!(instance_id = %record.instance_id, "Instance indeterminate across repeated sweeps");
                    report.escalated.push(record.instance_id.clone());
                }
            } else {
                retries.clear(&record.instance_id);
            }
        }

        let deletion_failed = record.status == LifecycleStatus::DeletionFailed;
        let action = if deletion_failed && provider == Presence::Absent {
            RepairAction::RemoveRecord
        } else {
            self.settings.policy.decide(class, deletion_failed)
        };

        if !class.is_drift() && action == RepairAction::None {
            return;
        }

        let applied = match action {
            RepairAction::RemoveRecord => match self.store.delete(&record.instance_id).await {
                Ok(()) => {
                    info!(instance_id = %record.instance_id, class = %class, "Removed record");
                    report.records_removed += 1;
                    true
                }
                Err(err) => {
                    error!(instance_id = %record.instance_id, error = %err, "Failed to remove record");
                    false
                }
            },
            RepairAction::Report => {
                warn!(
                    instance_id = %record.instance_id,
                    resource = %record.resource.name,
                    class = %class,
                    "Drift detected"
                );
                false
            }
            RepairAction::None => false,
        };

        report.findings.push(Finding {
            instance_id: Some(record.instance_id.clone()),
            resource: record.resource.name.clone(),
            tenancy: record.tenancy,
            status: Some(record.status),
            class,
            action,
            applied,
        });
    }

    async fn provider_presence(&self, record: &InstanceRecord) -> Presence {
        match record.tenancy {
            Tenancy::Dedicated => {
                let lookup = self
                    .bounded(self.resources.describe_resource(&record.resource.name))
                    .await
                    .map(|d| d.is_some());
                Presence::from_lookup(&lookup)
            }
            Tenancy::Shared => Presence::from_lookup(
                &self
                    .bounded(self.pool.database_exists(&record.resource.database_name))
                    .await,
            ),
        }
    }

    /// Report broker-tagged resources and broker databases with no record.
    async fn scan_untracked(&self, records: &[InstanceRecord], report: &mut SweepReport) {
        let known: BTreeSet<&str> = records.iter().map(|r| r.resource.name.as_str()).collect();
        let policy = self.settings.policy;
        let untracked = classify(Observation {
            record: false,
            provider: Presence::Present,
            platform: Presence::Unknown,
        });

        let mut orphans: Vec<(String, Tenancy)> = Vec::new();

        match self.bounded(self.resources.list_resources()).await {
            Ok(resources) => orphans.extend(
                resources
                    .into_iter()
                    .filter(|r| {
                        r.tags.contains_key(BROKER_TAG_KEY) && !known.contains(r.name.as_str())
                    })
                    .map(|r| (r.name, Tenancy::Dedicated)),
            ),
            Err(err) => {
                warn!(error = %err, "Failed to list provider resources");
                report.errors.push(format!("list resources: {err}"));
            }
        }

        match self.bounded(self.pool.list_databases()).await {
            Ok(databases) => orphans.extend(
                databases
                    .into_iter()
                    .filter(|name| !known.contains(name.as_str()))
                    .map(|name| (name, Tenancy::Shared)),
            ),
            Err(err) => {
                warn!(error = %err, "Failed to list shared databases");
                report.errors.push(format!("list databases: {err}"));
            }
        }

        for (resource, tenancy) in orphans {
            warn!(resource = %resource, tenancy = %tenancy, "Provider resource has no record");
            report.findings.push(Finding {
                instance_id: None,
                resource,
                tenancy,
                status: None,
                class: untracked,
                action: policy.decide(untracked, false),
                applied: false,
            });
        }
    }

    async fn bounded<T, E: std::fmt::Display>(
        &self,
        lookup: impl Future<Output = Result<T, E>>,
    ) -> Result<T, String> {
        match tokio::time::timeout(self.settings.lookup_timeout, lookup).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("lookup timed out".to_string()),
        }
    }
}
