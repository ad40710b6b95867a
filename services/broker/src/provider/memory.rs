//! In-memory provider used by tests and the `test` environment.
//!
//! Implements both provider surfaces. Resources move between states only
//! when a caller says so (`set_state`, `complete_pending`), which lets tests
//! play the role of the provider's background workers.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    LoginSpec, PoolEndpoint, ProviderResourceState, ResourceApi, ResourceDescription,
    ResourceModification, ResourceSpec, SharedPoolApi,
};
use crate::error::ProviderError;

/// A call observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    CreateResource(String),
    ModifyResource(String),
    DescribeResource(String),
    DeleteResource(String),
    ListResources,
    EnsureLogin {
        resource: String,
        username: String,
        created: bool,
    },
    CreateDatabase(String),
    DropDatabase(String),
    DatabaseExists(String),
    ListDatabases,
}

/// Calls that can be made to fail with `fail_next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateResource,
    ModifyResource,
    DescribeResource,
    DeleteResource,
    ListResources,
    EnsureLogin,
    CreateDatabase,
    DropDatabase,
    DatabaseExists,
    ListDatabases,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<String, ResourceDescription>,
    logins: BTreeSet<(String, String)>,
    /// Shared-pool databases and their owning login.
    databases: BTreeMap<String, String>,
    calls: Vec<ProviderCall>,
    failures: HashMap<FailPoint, VecDeque<ProviderError>>,
    latency: Option<Duration>,
}

#[derive(Debug)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    endpoint: PoolEndpoint,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::with_endpoint(PoolEndpoint {
            host: "shared-pool.stratus.internal".to_string(),
            port: 5432,
        })
    }

    pub fn with_endpoint(endpoint: PoolEndpoint) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            endpoint,
        }
    }

    /// Fail the next call at `point` with `err`. Failures queue up.
    pub async fn fail_next(&self, point: FailPoint, err: ProviderError) {
        self.inner
            .lock()
            .await
            .failures
            .entry(point)
            .or_default()
            .push_back(err);
    }

    /// Delay every subsequent call.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().await.latency = latency;
    }

    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    pub async fn resource(&self, name: &str) -> Option<ResourceDescription> {
        self.inner.lock().await.resources.get(name).cloned()
    }

    pub async fn insert_resource(&self, description: ResourceDescription) {
        self.inner
            .lock()
            .await
            .resources
            .insert(description.name.clone(), description);
    }

    pub async fn remove_resource(&self, name: &str) -> Option<ResourceDescription> {
        self.inner.lock().await.resources.remove(name)
    }

    /// Force the provider-reported state of a resource.
    pub async fn set_state(&self, name: &str, state: ProviderResourceState) -> bool {
        match self.inner.lock().await.resources.get_mut(name) {
            Some(resource) => {
                resource.state = state;
                true
            }
            None => false,
        }
    }

    /// Finish every pending provider operation: creating and modifying
    /// resources become available, deleting resources disappear.
    pub async fn complete_pending(&self) {
        let mut inner = self.inner.lock().await;
        inner
            .resources
            .retain(|_, r| r.state != ProviderResourceState::Deleting);
        for resource in inner.resources.values_mut() {
            if matches!(
                resource.state,
                ProviderResourceState::Creating | ProviderResourceState::Modifying
            ) {
                resource.state = ProviderResourceState::Available;
            }
        }
    }

    pub async fn logins(&self) -> Vec<(String, String)> {
        self.inner.lock().await.logins.iter().cloned().collect()
    }

    pub async fn insert_database(&self, database_name: &str, owner: &str) {
        self.inner
            .lock()
            .await
            .databases
            .insert(database_name.to_string(), owner.to_string());
    }

    pub async fn remove_database(&self, database_name: &str) -> bool {
        self.inner
            .lock()
            .await
            .databases
            .remove(database_name)
            .is_some()
    }

    /// Record the call, apply latency and pop a scripted failure.
    async fn enter(&self, point: FailPoint, call: ProviderCall) -> Result<(), ProviderError> {
        let latency = {
            let mut inner = self.inner.lock().await;
            inner.calls.push(call);
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().await;
        match inner.failures.get_mut(&point).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceApi for MemoryProvider {
    async fn create_resource(
        &self,
        spec: &ResourceSpec,
    ) -> Result<ResourceDescription, ProviderError> {
        self.enter(
            FailPoint::CreateResource,
            ProviderCall::CreateResource(spec.name.clone()),
        )
        .await?;

        let mut inner = self.inner.lock().await;
        if inner.resources.contains_key(&spec.name) {
            return Err(ProviderError::conflict(format!(
                "resource {} already exists",
                spec.name
            )));
        }

        let description = ResourceDescription {
            name: spec.name.clone(),
            state: ProviderResourceState::Creating,
            host: Some(format!("{}.stratus.internal", spec.name)),
            port: Some(spec.engine.default_port()),
            engine_version: spec.engine_version.clone(),
            tags: spec.tags.clone(),
        };
        inner
            .resources
            .insert(spec.name.clone(), description.clone());
        Ok(description)
    }

    async fn modify_resource(
        &self,
        modification: &ResourceModification,
    ) -> Result<ResourceDescription, ProviderError> {
        self.enter(
            FailPoint::ModifyResource,
            ProviderCall::ModifyResource(modification.name.clone()),
        )
        .await?;

        let mut inner = self.inner.lock().await;
        let resource = inner
            .resources
            .get_mut(&modification.name)
            .ok_or_else(|| ProviderError::not_found(format!("no resource {}", modification.name)))?;

        resource.state = ProviderResourceState::Modifying;
        if let Some(version) = &modification.engine_version {
            resource.engine_version = Some(version.clone());
        }
        Ok(resource.clone())
    }

    async fn describe_resource(
        &self,
        name: &str,
    ) -> Result<Option<ResourceDescription>, ProviderError> {
        self.enter(
            FailPoint::DescribeResource,
            ProviderCall::DescribeResource(name.to_string()),
        )
        .await?;
        Ok(self.inner.lock().await.resources.get(name).cloned())
    }

    async fn delete_resource(&self, name: &str) -> Result<(), ProviderError> {
        self.enter(
            FailPoint::DeleteResource,
            ProviderCall::DeleteResource(name.to_string()),
        )
        .await?;

        let mut inner = self.inner.lock().await;
        let resource = inner
            .resources
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(format!("no resource {name}")))?;
        resource.state = ProviderResourceState::Deleting;
        Ok(())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescription>, ProviderError> {
        self.enter(FailPoint::ListResources, ProviderCall::ListResources)
            .await?;
        Ok(self.inner.lock().await.resources.values().cloned().collect())
    }

    async fn ensure_login(&self, login: &LoginSpec) -> Result<bool, ProviderError> {
        let created = {
            let inner = self.inner.lock().await;
            !inner
                .logins
                .contains(&(login.resource_name.clone(), login.username.clone()))
        };
        self.enter(
            FailPoint::EnsureLogin,
            ProviderCall::EnsureLogin {
                resource: login.resource_name.clone(),
                username: login.username.clone(),
                created,
            },
        )
        .await?;

        let mut inner = self.inner.lock().await;
        if !inner.resources.contains_key(&login.resource_name) {
            return Err(ProviderError::not_found(format!(
                "no resource {}",
                login.resource_name
            )));
        }
        Ok(inner
            .logins
            .insert((login.resource_name.clone(), login.username.clone())))
    }
}

#[async_trait]
impl SharedPoolApi for MemoryProvider {
    fn endpoint(&self) -> PoolEndpoint {
        self.endpoint.clone()
    }

    async fn create_database(
        &self,
        database_name: &str,
        username: &str,
        _password: &str,
    ) -> Result<(), ProviderError> {
        self.enter(
            FailPoint::CreateDatabase,
            ProviderCall::CreateDatabase(database_name.to_string()),
        )
        .await?;

        let mut inner = self.inner.lock().await;
        if inner.databases.contains_key(database_name) {
            return Err(ProviderError::conflict(format!(
                "database {database_name} already exists"
            )));
        }
        inner
            .databases
            .insert(database_name.to_string(), username.to_string());
        Ok(())
    }

    async fn drop_database(&self, database_name: &str, _username: &str) -> Result<(), ProviderError> {
        self.enter(
            FailPoint::DropDatabase,
            ProviderCall::DropDatabase(database_name.to_string()),
        )
        .await?;
        self.inner.lock().await.databases.remove(database_name);
        Ok(())
    }

    async fn database_exists(&self, database_name: &str) -> Result<bool, ProviderError> {
        self.enter(
            FailPoint::DatabaseExists,
            ProviderCall::DatabaseExists(database_name.to_string()),
        )
        .await?;
        Ok(self.inner.lock().await.databases.contains_key(database_name))
    }

    async fn list_databases(&self) -> Result<Vec<String>, ProviderError> {
        self.enter(FailPoint::ListDatabases, ProviderCall::ListDatabases)
            .await?;
        Ok(self.inner.lock().await.databases.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Engine;
    use crate::error::ProviderErrorKind;

    fn spec(name: &str) -> ResourceSpec {
        ResourceSpec {
            name: name.to_string(),
            engine: Engine::Redis,
            engine_version: Some("7.0".to_string()),
            instance_class: None,
            allocated_storage_gb: None,
            node_count: Some(2),
            database_name: "d1".to_string(),
            master_username: "u1".to_string(),
            master_password: "pw".to_string(),
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_resource_lifecycle() {
        let provider = MemoryProvider::new();
        let created = provider.create_resource(&spec("r1")).await.unwrap();
        assert_eq!(created.state, ProviderResourceState::Creating);
        assert_eq!(created.port, Some(6379));

        provider.complete_pending().await;
        assert_eq!(
            provider.resource("r1").await.unwrap().state,
            ProviderResourceState::Available
        );

        provider.delete_resource("r1").await.unwrap();
        provider.complete_pending().await;
        assert!(provider.describe_resource("r1").await.unwrap().is_none());

        let err = provider.delete_resource("r1").await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_one_shot() {
        let provider = MemoryProvider::new();
        provider
            .fail_next(
                FailPoint::CreateResource,
                ProviderError::quota_exceeded("limit reached"),
            )
            .await;

        let err = provider.create_resource(&spec("r1")).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::QuotaExceeded);
        assert!(provider.resource("r1").await.is_none());

        provider.create_resource(&spec("r1")).await.unwrap();
        assert_eq!(
            provider.calls().await,
            vec![
                ProviderCall::CreateResource("r1".to_string()),
                ProviderCall::CreateResource("r1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_ensure_login_is_idempotent() {
        let provider = MemoryProvider::new();
        provider.create_resource(&spec("r1")).await.unwrap();
        let login = LoginSpec {
            resource_name: "r1".to_string(),
            username: "u1".to_string(),
            password: "pw".to_string(),
            database_name: "d1".to_string(),
        };

        assert!(provider.ensure_login(&login).await.unwrap());
        assert!(!provider.ensure_login(&login).await.unwrap());
        assert_eq!(provider.logins().await.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_databases() {
        let provider = MemoryProvider::new();
        provider.create_database("d1", "u1", "pw").await.unwrap();
        assert!(provider.database_exists("d1").await.unwrap());

        let err = provider.create_database("d1", "u1", "pw").await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Conflict);

        provider.drop_database("d1", "u1").await.unwrap();
        provider.drop_database("d1", "u1").await.unwrap();
        assert!(provider.list_databases().await.unwrap().is_empty());
    }
}
