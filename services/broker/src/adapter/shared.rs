//! Logical databases inside a long-lived shared pool.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    status_from_provider, status_when_absent, Credentials, Operation, OperationMode,
    ProviderAdapter,
};
use crate::catalog::{Engine, Plan};
use crate::error::ProviderError;
use crate::options::InstanceOptions;
use crate::provider::{ProviderResourceState, SharedPoolApi};
use crate::record::{InstanceRecord, LifecycleStatus};

pub struct SharedAdapter {
    pool: Arc<dyn SharedPoolApi>,
}

impl SharedAdapter {
    pub fn new(pool: Arc<dyn SharedPoolApi>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderAdapter for SharedAdapter {
    fn operation_mode(&self, _operation: Operation) -> OperationMode {
        OperationMode::Sync
    }

    async fn create_instance(
        &self,
        record: &InstanceRecord,
        _plan: &Plan,
        password: &str,
    ) -> Result<LifecycleStatus, ProviderError> {
        if record.engine != Engine::Postgres {
            return Err(ProviderError::invalid_parameters(format!(
                "shared plans support postgres only, not {}",
                record.engine
            )));
        }

        self.pool
            .create_database(&record.resource.database_name, &record.username, password)
            .await?;
        info!(
            instance_id = %record.instance_id,
            database = %record.resource.database_name,
            "Created shared database"
        );
        Ok(LifecycleStatus::Ready)
    }

    async fn modify_instance(
        &self,
        record: &InstanceRecord,
        _plan: &Plan,
        options: &InstanceOptions,
    ) -> Result<LifecycleStatus, ProviderError> {
        if options.engine_version.is_some() || options.allocated_storage.is_some() {
            return Err(ProviderError::invalid_parameters(
                "engine version and storage are fixed on shared plans",
            ));
        }
        debug!(instance_id = %record.instance_id, "Shared modify is a plan change only");
        Ok(LifecycleStatus::Ready)
    }

    async fn check_status(&self, record: &InstanceRecord) -> Result<LifecycleStatus, ProviderError> {
        let exists = self
            .pool
            .database_exists(&record.resource.database_name)
            .await?;
        Ok(if exists {
            status_from_provider(record.status, &ProviderResourceState::Available)
        } else {
            status_when_absent(record.status)
        })
    }

    async fn bind_to_consumer(
        &self,
        record: &mut InstanceRecord,
        password: &str,
    ) -> Result<Credentials, ProviderError> {
        let endpoint = self.pool.endpoint();
        record.resource.host = Some(endpoint.host.clone());
        record.resource.port = Some(endpoint.port);
        if record.status != LifecycleStatus::Bound {
            record.set_status(LifecycleStatus::Bound);
        }

        Ok(Credentials::new(
            record.engine,
            endpoint.host,
            endpoint.port,
            record.resource.database_name.clone(),
            record.username.clone(),
            password.to_string(),
        ))
    }

    async fn delete_instance(
        &self,
        record: &InstanceRecord,
    ) -> Result<LifecycleStatus, ProviderError> {
        self.pool
            .drop_database(&record.resource.database_name, &record.username)
            .await?;
        info!(
            instance_id = %record.instance_id,
            database = %record.resource.database_name,
            "Dropped shared database"
        );
        Ok(LifecycleStatus::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Tenancy;
    use crate::error::ProviderErrorKind;
    use crate::provider::MemoryProvider;
    use crate::testing;

    fn shared_record(id: &str, status: LifecycleStatus) -> InstanceRecord {
        let mut record = testing::record(id, status);
        record.tenancy = Tenancy::Shared;
        record
    }

    #[tokio::test]
    async fn test_create_is_synchronous() {
        let provider = Arc::new(MemoryProvider::new());
        let adapter = SharedAdapter::new(provider.clone());
        let plan = testing::plan("pg-shared", Engine::Postgres, Tenancy::Shared);
        let record = shared_record("inst-1", LifecycleStatus::Requested);

        let status = adapter.create_instance(&record, &plan, "pw").await.unwrap();
        assert_eq!(status, LifecycleStatus::Ready);
        assert!(provider
            .database_exists(&record.resource.database_name)
            .await
            .unwrap());
        assert_eq!(adapter.operation_mode(Operation::Delete), OperationMode::Sync);
    }

    #[tokio::test]
    async fn test_modify_rejects_engine_changes() {
        let adapter = SharedAdapter::new(Arc::new(MemoryProvider::new()));
        let plan = testing::plan("pg-shared", Engine::Postgres, Tenancy::Shared);
        let record = shared_record("inst-1", LifecycleStatus::Ready);

        let err = adapter
            .modify_instance(
                &record,
                &plan,
                &InstanceOptions {
                    engine_version: Some("16".to_string()),
                    allocated_storage: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidParameters);
    }

    #[tokio::test]
    async fn test_bind_uses_pool_endpoint() {
        let adapter = SharedAdapter::new(Arc::new(MemoryProvider::new()));
        let mut record = shared_record("inst-1", LifecycleStatus::Ready);

        let creds = adapter.bind_to_consumer(&mut record, "pw").await.unwrap();
        assert_eq!(creds.host, "shared-pool.stratus.internal");
        assert_eq!(creds.name, record.resource.database_name);
        assert_eq!(record.status, LifecycleStatus::Bound);
    }

    #[tokio::test]
    async fn test_delete_drops_database_only() {
        let provider = Arc::new(MemoryProvider::new());
        let adapter = SharedAdapter::new(provider.clone());
        let record = shared_record("inst-1", LifecycleStatus::Bound);
        provider
            .insert_database(&record.resource.database_name, &record.username)
            .await;
        provider.insert_database("dother", "uother").await;

        assert_eq!(
            adapter.delete_instance(&record).await.unwrap(),
            LifecycleStatus::Deleted
        );
        assert_eq!(provider.list_databases().await.unwrap(), vec!["dother"]);
        assert_eq!(
            adapter.check_status(&record).await.unwrap(),
            LifecycleStatus::DeletionFailed
        );
    }
}
