//! Provider adapters.
//!
//! An adapter performs the provider calls for one tenancy model and maps
//! provider conditions onto the lifecycle status set. The orchestrator picks
//! an adapter once per request through [`AdapterFactory`] and treats it as
//! opaque afterwards.

mod dedicated;
mod shared;

pub use dedicated::DedicatedAdapter;
pub use shared::SharedAdapter;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::catalog::{Engine, Plan, Tenancy};
use crate::error::ProviderError;
use crate::options::InstanceOptions;
use crate::provider::{ProviderResourceState, ResourceApi, SharedPoolApi};
use crate::record::{InstanceRecord, LifecycleStatus};

/// Caller-visible operations whose completion mode is declared per adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Modify,
    Bind,
    Delete,
}

/// Whether an operation completes within the request or must be polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Sync,
    Async,
}

/// Connection parameters handed to a consuming application.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
    pub uri: String,
}

impl Credentials {
    pub fn new(
        engine: Engine,
        host: String,
        port: u16,
        name: String,
        username: String,
        password: String,
    ) -> Self {
        let uri = connection_uri(engine, &host, port, &name, &username, &password);
        Self {
            host,
            port,
            name,
            username,
            password,
            uri,
        }
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("host".to_string(), self.host),
            ("port".to_string(), self.port.to_string()),
            ("name".to_string(), self.name),
            ("username".to_string(), self.username),
            ("password".to_string(), self.password),
            ("uri".to_string(), self.uri),
        ])
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Compose the engine's canonical connection string.
pub fn connection_uri(
    engine: Engine,
    host: &str,
    port: u16,
    name: &str,
    username: &str,
    password: &str,
) -> String {
    match engine {
        Engine::Postgres => format!("postgres://{username}:{password}@{host}:{port}/{name}"),
        Engine::Mysql => format!("mysql://{username}:{password}@{host}:{port}/{name}"),
        Engine::Redis => format!("rediss://:{password}@{host}:{port}"),
    }
}

/// The operations every tenancy model supports.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn operation_mode(&self, operation: Operation) -> OperationMode;

    /// Submit creation. `password` is the generated plaintext.
    async fn create_instance(
        &self,
        record: &InstanceRecord,
        plan: &Plan,
        password: &str,
    ) -> Result<LifecycleStatus, ProviderError>;

    /// Submit a modification. `record` already carries the requested
    /// values and `plan` is the target plan.
    async fn modify_instance(
        &self,
        record: &InstanceRecord,
        plan: &Plan,
        options: &InstanceOptions,
    ) -> Result<LifecycleStatus, ProviderError>;

    async fn check_status(&self, record: &InstanceRecord) -> Result<LifecycleStatus, ProviderError>;

    /// Produce consumer credentials. May fill in the resource endpoint and
    /// advance the record's status; the caller persists any change.
    async fn bind_to_consumer(
        &self,
        record: &mut InstanceRecord,
        password: &str,
    ) -> Result<Credentials, ProviderError>;

    async fn delete_instance(&self, record: &InstanceRecord)
        -> Result<LifecycleStatus, ProviderError>;
}

/// Status for a record whose resource the provider does not know.
///
/// A resource that has not shown up yet is still provisioning; one that
/// vanished after creation is a failure. Never `Ready`.
pub fn status_when_absent(prior: LifecycleStatus) -> LifecycleStatus {
    match prior {
        LifecycleStatus::Requested => LifecycleStatus::Provisioning,
        LifecycleStatus::Provisioning | LifecycleStatus::ProvisioningFailed => {
            LifecycleStatus::ProvisioningFailed
        }
        LifecycleStatus::Deleting | LifecycleStatus::Deleted => LifecycleStatus::Deleted,
        LifecycleStatus::Ready
        | LifecycleStatus::Bound
        | LifecycleStatus::Binding
        | LifecycleStatus::Modifying
        | LifecycleStatus::ModifyFailed
        | LifecycleStatus::DeletionFailed => LifecycleStatus::DeletionFailed,
    }
}

/// Status for a record given the provider-reported state of its resource.
pub fn status_from_provider(
    prior: LifecycleStatus,
    state: &ProviderResourceState,
) -> LifecycleStatus {
    use LifecycleStatus as S;

    match state {
        ProviderResourceState::Creating => match prior {
            S::Requested | S::Provisioning => S::Provisioning,
            other => other,
        },
        ProviderResourceState::Available => match prior {
            S::Requested | S::Provisioning | S::Modifying | S::Binding | S::ModifyFailed => {
                S::Ready
            }
            other => other,
        },
        ProviderResourceState::Modifying => match prior {
            S::Deleting => S::Deleting,
            S::Ready | S::Bound | S::Modifying => S::Modifying,
            other => other,
        },
        ProviderResourceState::Maintenance => prior,
        ProviderResourceState::Deleting => S::Deleting,
        ProviderResourceState::Failed => match prior {
            S::Requested | S::Provisioning => S::ProvisioningFailed,
            S::Deleting => S::DeletionFailed,
            S::Ready | S::Bound | S::Binding | S::Modifying => S::ModifyFailed,
            other => other,
        },
        ProviderResourceState::Other(raw) => {
            warn!(state = %raw, prior = %prior, "Unrecognised provider state");
            prior
        }
    }
}

/// Selects the adapter for a plan or record.
#[derive(Clone)]
pub struct AdapterFactory {
    dedicated: Arc<DedicatedAdapter>,
    shared: Arc<SharedAdapter>,
}

impl AdapterFactory {
    pub fn new(resources: Arc<dyn ResourceApi>, pool: Arc<dyn SharedPoolApi>) -> Self {
        Self {
            dedicated: Arc::new(DedicatedAdapter::new(resources)),
            shared: Arc::new(SharedAdapter::new(pool)),
        }
    }

    pub fn for_tenancy(&self, tenancy: Tenancy) -> Arc<dyn ProviderAdapter> {
        match tenancy {
            Tenancy::Dedicated => self.dedicated.clone(),
            Tenancy::Shared => self.shared.clone(),
        }
    }

    pub fn for_plan(&self, plan: &Plan) -> Arc<dyn ProviderAdapter> {
        self.for_tenancy(plan.tenancy)
    }
}
