//! Clients for the cloud provider.
//!
//! Two surfaces are consumed:
//! - `ResourceApi`: the resource-management API that creates, modifies and
//!   deletes standalone database and cache resources (dedicated tenancy)
//! - `SharedPoolApi`: the admin connection of a long-lived pool in which
//!   logical databases are created (shared tenancy)
//!
//! Every call may block on network I/O; callers bound them with a timeout.

mod http;
mod memory;
mod shared_pg;

pub use http::HttpResourceApi;
pub use memory::{FailPoint, MemoryProvider, ProviderCall};
pub use shared_pg::PgSharedPool;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::Engine;
use crate::error::ProviderError;

/// Provider-reported condition of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderResourceState {
    Creating,
    Available,
    Modifying,
    /// Backups, patching and similar maintenance that keeps the resource up.
    Maintenance,
    Deleting,
    Failed,
    Other(String),
}

impl ProviderResourceState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Modifying => "modifying",
            Self::Maintenance => "maintenance",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ProviderResourceState {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "modifying" | "upgrading" | "rebooting cluster nodes" | "storage-optimization" => {
                Self::Modifying
            }
            "backing-up" | "snapshotting" | "maintenance" => Self::Maintenance,
            "deleting" => Self::Deleting,
            "failed" | "create-failed" | "restore-failed" | "incompatible-parameters"
            | "incompatible-network" | "incompatible-restore" | "inaccessible-encryption-credentials" => {
                Self::Failed
            }
            _ => Self::Other(raw),
        }
    }
}

impl From<ProviderResourceState> for String {
    fn from(state: ProviderResourceState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for ProviderResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a dedicated resource to create.
#[derive(Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub engine: Engine,
    pub engine_version: Option<String>,
    pub instance_class: Option<String>,
    pub allocated_storage_gb: Option<u32>,
    pub node_count: Option<u32>,
    pub database_name: String,
    pub master_username: String,
    pub master_password: String,
    pub tags: BTreeMap<String, String>,
}

impl fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSpec")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("engine_version", &self.engine_version)
            .field("instance_class", &self.instance_class)
            .field("allocated_storage_gb", &self.allocated_storage_gb)
            .field("node_count", &self.node_count)
            .field("database_name", &self.database_name)
            .field("master_username", &self.master_username)
            .field("master_password", &"<redacted>")
            .finish()
    }
}

/// Fields of a dedicated resource that may change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceModification {
    pub name: String,
    pub engine_version: Option<String>,
    pub allocated_storage_gb: Option<u32>,
    pub instance_class: Option<String>,
}

/// What the provider reports about a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub name: String,
    pub state: ProviderResourceState,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A login to ensure on a dedicated resource.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginSpec {
    pub resource_name: String,
    pub username: String,
    pub password: String,
    pub database_name: String,
}

impl fmt::Debug for LoginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginSpec")
            .field("resource_name", &self.resource_name)
            .field("username", &self.username)
            .field("database_name", &self.database_name)
            .finish_non_exhaustive()
    }
}

/// The provider's resource-management API.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Submit creation of a resource.
    async fn create_resource(&self, spec: &ResourceSpec)
        -> Result<ResourceDescription, ProviderError>;

    /// Submit a modification.
    async fn modify_resource(
        &self,
        modification: &ResourceModification,
    ) -> Result<ResourceDescription, ProviderError>;

    /// Describe a resource; `None` when the provider has no such resource.
    async fn describe_resource(&self, name: &str)
        -> Result<Option<ResourceDescription>, ProviderError>;

    /// Submit deletion. Fails with `NotFound` when the resource is gone.
    async fn delete_resource(&self, name: &str) -> Result<(), ProviderError>;

    /// All resources visible to the broker's account.
    async fn list_resources(&self) -> Result<Vec<ResourceDescription>, ProviderError>;

    /// Make sure a login exists on the resource. Idempotent; returns true
    /// only when the login was created by this call.
    async fn ensure_login(&self, login: &LoginSpec) -> Result<bool, ProviderError>;
}

/// Endpoint consumers use to reach a shared pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEndpoint {
    pub host: String,
    pub port: u16,
}

/// Admin access to a shared-tenant pool.
#[async_trait]
pub trait SharedPoolApi: Send + Sync {
    fn endpoint(&self) -> PoolEndpoint;

    /// Create a login and a database owned by it.
    async fn create_database(
        &self,
        database_name: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ProviderError>;

    /// Drop the database and its login. Absent objects are not an error.
    async fn drop_database(&self, database_name: &str, username: &str)
        -> Result<(), ProviderError>;

    async fn database_exists(&self, database_name: &str) -> Result<bool, ProviderError>;

    /// Broker-created databases in the pool.
    async fn list_databases(&self) -> Result<Vec<String>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing() {
        assert_eq!(
            ProviderResourceState::from("available".to_string()),
            ProviderResourceState::Available
        );
        assert_eq!(
            ProviderResourceState::from("create-failed".to_string()),
            ProviderResourceState::Failed
        );
        assert_eq!(
            ProviderResourceState::from("snapshotting".to_string()),
            ProviderResourceState::Maintenance
        );
        assert_eq!(
            ProviderResourceState::from("Creating".to_string()),
            ProviderResourceState::Creating
        );
        assert_eq!(
            ProviderResourceState::from("stopped".to_string()),
            ProviderResourceState::Other("stopped".to_string())
        );
    }

    #[test]
    fn test_description_deserializes_state_string() {
        let desc: ResourceDescription = serde_json::from_value(serde_json::json!({
            "name": "stratus-abc",
            "state": "modifying",
            "host": "stratus-abc.cache.internal",
            "port": 6379
        }))
        .unwrap();
        assert_eq!(desc.state, ProviderResourceState::Modifying);
        assert!(desc.tags.is_empty());
    }

    #[test]
    fn test_spec_debug_redacts_password() {
        let spec = ResourceSpec {
            name: "r".to_string(),
            engine: Engine::Postgres,
            engine_version: None,
            instance_class: None,
            allocated_storage_gb: None,
            node_count: None,
            database_name: "db".to_string(),
            master_username: "u".to_string(),
            master_password: "s3cret".to_string(),
            tags: BTreeMap::new(),
        };
        assert!(!format!("{spec:?}").contains("s3cret"));
    }
}
