//! Lifecycle orchestrator.
//!
//! Drives create, modify, bind, last-operation and delete requests:
//! load and validate the record, pick the adapter for its tenancy, call the
//! provider under a timeout, and commit the resulting status.
//!
//! Operations on one instance never interleave. A request that finds the
//! record mid-operation, or finds another request holding the instance,
//! fails with `Conflict`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::adapter::{AdapterFactory, Credentials, Operation, OperationMode};
use crate::catalog::{Catalog, Tenancy};
use crate::credentials::{generate_identifier, generate_password, CredentialCodec, MIN_PASSWORD_LENGTH};
use crate::error::{BrokerError, BrokerResult, ProviderError};
use crate::gate::{GateGuard, InFlightGate};
use crate::options::InstanceOptions;
use crate::record::{
    resource_name, InstanceRecord, LastOperationState, LifecycleStatus, NewInstance,
    ResourceHandle,
};
use crate::store::{InstanceStore, StoreError};
use crate::tags::{check_reserved, merge_tags, ResourceGuids, TagManager, TagOperation};

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Upper bound on any single provider call.
    pub provider_timeout: Duration,

    /// Prefix of dedicated resource names.
    pub resource_prefix: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(60),
            resource_prefix: "stratus".to_string(),
        }
    }
}

/// A parsed create request.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRequest {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    /// Raw JSON parameters.
    pub raw_options: Vec<u8>,
    pub tags: BTreeMap<String, String>,
}

/// A parsed modify request.
#[derive(Debug, Clone, Default)]
pub struct ModifyRequest {
    pub instance_id: String,
    /// Target plan; `None` keeps the current one.
    pub plan_id: Option<String>,
    pub raw_options: Vec<u8>,
}

/// Result of a mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOutcome {
    pub status: LifecycleStatus,
    pub mode: OperationMode,
}

/// Answer to a last-operation poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastOperation {
    pub state: LastOperationState,
    pub description: String,
}

impl LastOperation {
    fn from_status(status: LifecycleStatus) -> Self {
        Self {
            state: status.into(),
            description: format!("Instance is {status}"),
        }
    }
}

pub struct Broker {
    catalog: Arc<Catalog>,
    store: Arc<dyn InstanceStore>,
    codec: Arc<CredentialCodec>,
    tags: Arc<dyn TagManager>,
    adapters: AdapterFactory,
    gate: InFlightGate,
    settings: BrokerSettings,
}

impl Broker {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn InstanceStore>,
        codec: Arc<CredentialCodec>,
        tags: Arc<dyn TagManager>,
        adapters: AdapterFactory,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            catalog,
            store,
            codec,
            tags,
            adapters,
            gate: InFlightGate::new(),
            settings,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Whether `operation` on instances of `plan_id` completes asynchronously.
    pub fn is_async(&self, plan_id: &str, operation: Operation) -> BrokerResult<bool> {
        let resolved = self.catalog.fetch_plan(plan_id)?;
        let mode = self
            .adapters
            .for_plan(resolved.plan)
            .operation_mode(operation);
        Ok(mode == OperationMode::Async)
    }

    #[instrument(skip(self, request), fields(instance_id = %request.instance_id, plan_id = %request.plan_id))]
    pub async fn create(&self, request: ProvisionRequest) -> BrokerResult<OperationOutcome> {
        let resolved = self.catalog.fetch_plan(&request.plan_id)?;
        let plan = resolved.plan;
        let options = InstanceOptions::parse(&request.raw_options, plan)?;
        check_reserved(&request.tags).map_err(|e| BrokerError::Validation(e.to_string()))?;

        let _guard = self.acquire(&request.instance_id)?;
        match self.store.get(&request.instance_id).await {
            Ok(_) => {
                return Err(BrokerError::Conflict(format!(
                    "instance {} already exists",
                    request.instance_id
                )))
            }
            Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let guids = ResourceGuids {
            instance_guid: request.instance_id.clone(),
            space_guid: request.space_guid.clone(),
            organization_guid: request.organization_guid.clone(),
        };
        let generated = self
            .tags
            .generate_tags(
                TagOperation::Create,
                &resolved.service.name,
                &plan.name,
                &guids,
                false,
            )
            .map_err(|e| BrokerError::Internal(e.to_string()))?;
        let mut tags = merge_tags(&plan.tags, &request.tags);
        tags.extend(generated);

        let username = generate_identifier('u');
        let database_name = generate_identifier('d');
        let password = generate_password(MIN_PASSWORD_LENGTH);
        let sealed = self.codec.encrypt(&password)?;

        let name = match plan.tenancy {
            Tenancy::Dedicated => resource_name(&self.settings.resource_prefix, &request.instance_id),
            Tenancy::Shared => database_name.clone(),
        };
        let resource = ResourceHandle {
            name,
            database_name,
            host: None,
            port: None,
        };

        let service_id = if request.service_id.is_empty() {
            resolved.service.id.as_str()
        } else {
            request.service_id.as_str()
        };
        let mut record = InstanceRecord::new(
            NewInstance {
                instance_id: &request.instance_id,
                organization_guid: &request.organization_guid,
                space_guid: &request.space_guid,
                service_id,
            },
            plan,
            &options,
            username,
            sealed,
            resource,
            tags,
        );
        self.store.create(&record).await?;

        let adapter = self.adapters.for_plan(plan);
        let mode = adapter.operation_mode(Operation::Create);
        match self
            .call_provider(adapter.create_instance(&record, plan, &password))
            .await
        {
            Ok(status) => {
                record.set_status(status);
                self.persist_after_provider(&record).await?;
                info!(status = %status, "Instance created");
                Ok(OperationOutcome { status, mode })
            }
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Provider unavailable during create; record left requested");
                Err(err.into())
            }
            Err(err) => {
                record.set_status(LifecycleStatus::ProvisioningFailed);
                self.persist_failure(&record).await;
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self, request), fields(instance_id = %request.instance_id))]
    pub async fn modify(&self, request: ModifyRequest) -> BrokerResult<OperationOutcome> {
        let _guard = self.acquire(&request.instance_id)?;
        let mut record = self.store.get(&request.instance_id).await?;

        if record.status.is_in_progress() {
            return Err(in_progress(&record));
        }
        if !record.status.is_usable() {
            return Err(BrokerError::Validation(format!(
                "instance {} is {} and cannot be modified",
                record.instance_id, record.status
            )));
        }

        let current = self.catalog.fetch_plan(&record.plan_id)?;
        let target = match &request.plan_id {
            Some(plan_id) => self.catalog.fetch_plan(plan_id)?,
            None => current,
        };
        if !current.plan.same_family(target.plan) {
            return Err(BrokerError::Validation(format!(
                "plan {} cannot be changed to {}: different plan family",
                current.plan.id, target.plan.id
            )));
        }

        let options = InstanceOptions::parse(&request.raw_options, target.plan)?;
        options.validate_modification(&record)?;

        let mut updated = record.clone();
        updated.apply_options(&options);
        let guids = ResourceGuids {
            instance_guid: record.instance_id.clone(),
            space_guid: record.space_guid.clone(),
            organization_guid: record.organization_guid.clone(),
        };
        let generated = self
            .tags
            .generate_tags(
                TagOperation::Update,
                &target.service.name,
                &target.plan.name,
                &guids,
                true,
            )
            .map_err(|e| BrokerError::Internal(e.to_string()))?;
        updated.tags.extend(generated);

        let adapter = self.adapters.for_tenancy(record.tenancy);
        let mode = adapter.operation_mode(Operation::Modify);
        match self
            .call_provider(adapter.modify_instance(&updated, target.plan, &options))
            .await
        {
            Ok(status) => {
                updated.plan_id = target.plan.id.clone();
                updated.set_status(status);
                self.persist_after_provider(&updated).await?;
                info!(status = %status, plan_id = %updated.plan_id, "Instance modified");
                Ok(OperationOutcome { status, mode })
            }
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Provider unavailable during modify; record unchanged");
                Err(err.into())
            }
            Err(err) => {
                record.set_status(LifecycleStatus::ModifyFailed);
                self.persist_failure(&record).await;
                Err(err.into())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn bind(&self, instance_id: &str) -> BrokerResult<Credentials> {
        let _guard = self.acquire(instance_id)?;
        let record = self.store.get(instance_id).await?;

        if record.status.is_in_progress() {
            return Err(in_progress(&record));
        }
        if !record.status.is_usable() {
            return Err(BrokerError::Validation(format!(
                "instance {} is {} and cannot be bound",
                record.instance_id, record.status
            )));
        }

        let password = self.codec.decrypt(&record.password)?;
        let mut updated = record.clone();
        let adapter = self.adapters.for_tenancy(record.tenancy);
        let credentials = self
            .call_provider(adapter.bind_to_consumer(&mut updated, &password))
            .await?;

        if updated.status != record.status || updated.resource != record.resource {
            self.persist_after_provider(&updated).await?;
        }
        info!(status = %updated.status, "Instance bound");
        Ok(credentials)
    }

    /// Poll the provider and report the tri-state of the last operation.
    /// Writes only when the status changed.
    #[instrument(skip(self))]
    pub async fn last_operation(&self, instance_id: &str) -> BrokerResult<LastOperation> {
        let Some(_guard) = self.gate.try_acquire(instance_id) else {
            return Ok(LastOperation {
                state: LastOperationState::InProgress,
                description: "Another operation on this instance is in progress".to_string(),
            });
        };
        let record = self.store.get(instance_id).await?;

        let adapter = self.adapters.for_tenancy(record.tenancy);
        let status = match self.call_provider(adapter.check_status(&record)).await {
            Ok(status) => status,
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Provider unavailable during status check");
                return Ok(LastOperation {
                    state: LastOperationState::InProgress,
                    description: format!("Status temporarily unavailable: {}", err.message),
                });
            }
            Err(err) => return Err(err.into()),
        };

        if status != record.status {
            info!(prior = %record.status, status = %status, "Status changed");
            if status == LifecycleStatus::Deleted {
                self.store.delete(instance_id).await?;
            } else {
                let mut updated = record;
                updated.set_status(status);
                self.store.update(&updated).await?;
            }
        }

        Ok(LastOperation::from_status(status))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, instance_id: &str) -> BrokerResult<OperationOutcome> {
        let _guard = self.acquire(instance_id)?;
        let mut record = self.store.get(instance_id).await?;

        if matches!(
            record.status,
            LifecycleStatus::Provisioning
                | LifecycleStatus::Modifying
                | LifecycleStatus::Binding
                | LifecycleStatus::Deleting
        ) {
            return Err(in_progress(&record));
        }

        let adapter = self.adapters.for_tenancy(record.tenancy);
        let mode = adapter.operation_mode(Operation::Delete);
        match self.call_provider(adapter.delete_instance(&record)).await {
            Ok(LifecycleStatus::Deleted) => {
                if let Err(err) = self.store.delete(instance_id).await {
                    error!(error = %err, "provider resource requires reconciliation");
                    return Err(err.into());
                }
                info!("Instance deleted");
                Ok(OperationOutcome {
                    status: LifecycleStatus::Deleted,
                    mode,
                })
            }
            Ok(status) => {
                record.set_status(status);
                self.persist_after_provider(&record).await?;
                info!(status = %status, "Instance deletion submitted");
                Ok(OperationOutcome { status, mode })
            }
            Err(err) if err.is_transient() => {
                warn!(error = %err, "Provider unavailable during delete; record unchanged");
                Err(err.into())
            }
            Err(err) => {
                record.set_status(LifecycleStatus::DeletionFailed);
                self.persist_failure(&record).await;
                Err(err.into())
            }
        }
    }

    fn acquire(&self, instance_id: &str) -> BrokerResult<GateGuard> {
        self.gate.try_acquire(instance_id).ok_or_else(|| {
            BrokerError::Conflict(format!(
                "another operation on instance {instance_id} is in progress"
            ))
        })
    }

    async fn call_provider<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        match tokio::time::timeout(self.settings.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::unavailable(format!(
                "provider call timed out after {}s",
                self.settings.provider_timeout.as_secs_f64()
            ))),
        }
    }

    /// Persist a status the provider already acted on.
    async fn persist_after_provider(&self, record: &InstanceRecord) -> BrokerResult<()> {
        if let Err(err) = self.store.update(record).await {
            error!(
                instance_id = %record.instance_id,
                status = %record.status,
                resource = %record.resource.name,
                error = %err,
                "provider resource requires reconciliation"
            );
            return Err(BrokerError::Internal(err.to_string()));
        }
        Ok(())
    }

    /// Persist a terminal failure. The provider error is what the caller
    /// sees, so a store failure here is only logged.
    async fn persist_failure(&self, record: &InstanceRecord) {
        warn!(instance_id = %record.instance_id, status = %record.status, "Operation failed");
        if let Err(err) = self.store.update(record).await {
            error!(
                instance_id = %record.instance_id,
                status = %record.status,
                error = %err,
                "Failed to record failure status"
            );
        }
    }
}

fn in_progress(record: &InstanceRecord) -> BrokerError {
    BrokerError::Conflict(format!(
        "instance {} is {}; wait for the operation to finish",
        record.instance_id, record.status
    ))
}
