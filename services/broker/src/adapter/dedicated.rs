//! One provider resource per instance.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    status_from_provider, status_when_absent, Credentials, Operation, OperationMode,
    ProviderAdapter,
};
use crate::catalog::Plan;
use crate::error::{ProviderError, ProviderErrorKind};
use crate::options::InstanceOptions;
use crate::provider::{
    LoginSpec, ProviderResourceState, ResourceApi, ResourceModification, ResourceSpec,
};
use crate::record::{InstanceRecord, LifecycleStatus};

pub struct DedicatedAdapter {
    api: Arc<dyn ResourceApi>,
}

impl DedicatedAdapter {
    pub fn new(api: Arc<dyn ResourceApi>) -> Self {
        Self { api }
    }

    /// Resolve host and port, asking the provider when the record has none.
    async fn endpoint(&self, record: &InstanceRecord) -> Result<(String, u16), ProviderError> {
        if let (Some(host), Some(port)) = (&record.resource.host, record.resource.port) {
            return Ok((host.clone(), port));
        }

        let description = self
            .api
            .describe_resource(&record.resource.name)
            .await?
            .ok_or_else(|| {
                ProviderError::not_found(format!("resource {} not found", record.resource.name))
            })?;

        if !matches!(
            description.state,
            ProviderResourceState::Available | ProviderResourceState::Maintenance
        ) {
            return Err(ProviderError::conflict(format!(
                "resource {} is {}",
                record.resource.name, description.state
            )));
        }

        let host = description.host.ok_or_else(|| {
            ProviderError::unavailable(format!(
                "resource {} has no endpoint yet",
                record.resource.name
            ))
        })?;
        let port = description.port.unwrap_or_else(|| record.engine.default_port());
        Ok((host, port))
    }
}

#[async_trait]
impl ProviderAdapter for DedicatedAdapter {
    fn operation_mode(&self, operation: Operation) -> OperationMode {
        match operation {
            Operation::Create | Operation::Modify | Operation::Delete => OperationMode::Async,
            Operation::Bind => OperationMode::Sync,
        }
    }

    async fn create_instance(
        &self,
        record: &InstanceRecord,
        plan: &Plan,
        password: &str,
    ) -> Result<LifecycleStatus, ProviderError> {
        let spec = ResourceSpec {
            name: record.resource.name.clone(),
            engine: record.engine,
            engine_version: record.engine_version.clone(),
            instance_class: plan.instance_class.clone(),
            allocated_storage_gb: record.allocated_storage_gb,
            node_count: plan.node_count,
            database_name: record.resource.database_name.clone(),
            master_username: record.username.clone(),
            master_password: password.to_string(),
            tags: record.tags.clone(),
        };

        let description = self.api.create_resource(&spec).await?;
        info!(
            instance_id = %record.instance_id,
            resource = %description.name,
            state = %description.state,
            "Submitted resource creation"
        );
        Ok(status_from_provider(
            LifecycleStatus::Provisioning,
            &description.state,
        ))
    }

    async fn modify_instance(
        &self,
        record: &InstanceRecord,
        plan: &Plan,
        options: &InstanceOptions,
    ) -> Result<LifecycleStatus, ProviderError> {
        let modification = ResourceModification {
            name: record.resource.name.clone(),
            engine_version: options.engine_version.clone(),
            allocated_storage_gb: options.allocated_storage,
            instance_class: plan.instance_class.clone(),
        };

        let description = self.api.modify_resource(&modification).await?;
        info!(
            instance_id = %record.instance_id,
            resource = %description.name,
            state = %description.state,
            "Submitted resource modification"
        );
        Ok(status_from_provider(
            LifecycleStatus::Modifying,
            &description.state,
        ))
    }

    async fn check_status(&self, record: &InstanceRecord) -> Result<LifecycleStatus, ProviderError> {
        let status = match self.api.describe_resource(&record.resource.name).await? {
            Some(description) => status_from_provider(record.status, &description.state),
            None => status_when_absent(record.status),
        };
        debug!(
            instance_id = %record.instance_id,
            prior = %record.status,
            status = %status,
            "Checked resource status"
        );
        Ok(status)
    }

    async fn bind_to_consumer(
        &self,
        record: &mut InstanceRecord,
        password: &str,
    ) -> Result<Credentials, ProviderError> {
        let (host, port) = self.endpoint(record).await?;
        record.resource.host = Some(host.clone());
        record.resource.port = Some(port);

        if record.status != LifecycleStatus::Bound {
            if record.engine.is_relational() {
                let created = self
                    .api
                    .ensure_login(&LoginSpec {
                        resource_name: record.resource.name.clone(),
                        username: record.username.clone(),
                        password: password.to_string(),
                        database_name: record.resource.database_name.clone(),
                    })
                    .await?;
                debug!(instance_id = %record.instance_id, created, "Ensured consumer login");
            }
            record.set_status(LifecycleStatus::Bound);
        }

        Ok(Credentials::new(
            record.engine,
            host,
            port,
            record.resource.database_name.clone(),
            record.username.clone(),
            password.to_string(),
        ))
    }

    async fn delete_instance(
        &self,
        record: &InstanceRecord,
    ) -> Result<LifecycleStatus, ProviderError> {
        match self.api.delete_resource(&record.resource.name).await {
            Ok(()) => {
                info!(instance_id = %record.instance_id, resource = %record.resource.name, "Submitted resource deletion");
                Ok(LifecycleStatus::Deleting)
            }
            Err(err) if err.kind == ProviderErrorKind::NotFound => {
                info!(instance_id = %record.instance_id, resource = %record.resource.name, "Resource already gone");
                Ok(LifecycleStatus::Deleted)
            }
            Err(err) => Err(err),
        }
    }
}
