//! The persisted instance record and its lifecycle status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::{Engine, Plan, Tenancy};
use crate::credentials::EncryptedPassword;
use crate::options::InstanceOptions;

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleStatus {
    Requested,
    Provisioning,
    Ready,
    ProvisioningFailed,
    Modifying,
    ModifyFailed,
    Binding,
    Bound,
    Deleting,
    Deleted,
    DeletionFailed,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::ProvisioningFailed => "provisioning-failed",
            Self::Modifying => "modifying",
            Self::ModifyFailed => "modify-failed",
            Self::Binding => "binding",
            Self::Bound => "bound",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::DeletionFailed => "deletion-failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(Self::Requested),
            "provisioning" => Some(Self::Provisioning),
            "ready" => Some(Self::Ready),
            "provisioning-failed" => Some(Self::ProvisioningFailed),
            "modifying" => Some(Self::Modifying),
            "modify-failed" => Some(Self::ModifyFailed),
            "binding" => Some(Self::Binding),
            "bound" => Some(Self::Bound),
            "deleting" => Some(Self::Deleting),
            "deleted" => Some(Self::Deleted),
            "deletion-failed" => Some(Self::DeletionFailed),
            _ => None,
        }
    }

    /// An asynchronous operation is in flight for the record.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Requested | Self::Provisioning | Self::Modifying | Self::Binding | Self::Deleting
        )
    }

    /// Terminal failure; the record is retained for inspection.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::ProvisioningFailed | Self::ModifyFailed | Self::DeletionFailed
        )
    }

    /// The resource exists and can serve consumers. A rejected modify leaves
    /// the resource as it was.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ready | Self::Bound | Self::ModifyFailed)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing state of the last asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl LastOperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl From<LifecycleStatus> for LastOperationState {
    fn from(status: LifecycleStatus) -> Self {
        match status {
            LifecycleStatus::Ready | LifecycleStatus::Bound | LifecycleStatus::Deleted => {
                Self::Succeeded
            }
            LifecycleStatus::ProvisioningFailed
            | LifecycleStatus::ModifyFailed
            | LifecycleStatus::DeletionFailed => Self::Failed,
            LifecycleStatus::Requested
            | LifecycleStatus::Provisioning
            | LifecycleStatus::Modifying
            | LifecycleStatus::Binding
            | LifecycleStatus::Deleting => Self::InProgress,
        }
    }
}

impl fmt::Display for LastOperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-side addressing of the resource backing an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Provider resource identifier. For shared tenancy this is the name of
    /// the logical database inside the pool.
    pub name: String,
    /// Database (or cache) name handed to consumers.
    pub database_name: String,
    /// Endpoint, once the provider has reported one.
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// One provisioned instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    pub service_id: String,
    pub plan_id: String,
    pub engine: Engine,
    pub tenancy: Tenancy,
    pub engine_version: Option<String>,
    pub allocated_storage_gb: Option<u32>,
    pub status: LifecycleStatus,
    pub username: String,
    pub password: EncryptedPassword,
    pub resource: ResourceHandle,
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity and ownership of a new instance.
#[derive(Debug, Clone)]
pub struct NewInstance<'a> {
    pub instance_id: &'a str,
    pub organization_guid: &'a str,
    pub space_guid: &'a str,
    pub service_id: &'a str,
}

impl InstanceRecord {
    /// Build a `requested` record from a plan and validated options.
    pub fn new(
        identity: NewInstance<'_>,
        plan: &Plan,
        options: &InstanceOptions,
        username: String,
        password: EncryptedPassword,
        resource: ResourceHandle,
        tags: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        let engine_version = options
            .engine_version
            .clone()
            .or_else(|| plan.default_version.clone());
        let allocated_storage_gb = options.allocated_storage.or(plan.allocated_storage_gb);

        Self {
            instance_id: identity.instance_id.to_string(),
            organization_guid: identity.organization_guid.to_string(),
            space_guid: identity.space_guid.to_string(),
            service_id: identity.service_id.to_string(),
            plan_id: plan.id.clone(),
            engine: plan.engine,
            tenancy: plan.tenancy,
            engine_version,
            allocated_storage_gb,
            status: LifecycleStatus::Requested,
            username,
            password,
            resource,
            tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the fields a modify request may change.
    pub fn apply_options(&mut self, options: &InstanceOptions) {
        if let Some(version) = &options.engine_version {
            self.engine_version = Some(version.clone());
        }
        if let Some(storage) = options.allocated_storage {
            self.allocated_storage_gb = Some(storage);
        }
    }

    pub fn set_status(&mut self, status: LifecycleStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Longest name the providers accept for a dedicated resource.
pub const MAX_RESOURCE_NAME_LEN: usize = 40;

const MAX_PREFIX_LEN: usize = 15;

/// Derive the provider resource name for a dedicated instance.
///
/// The sanitized prefix followed by a hex SHA-256 digest of the full instance
/// id, cut to [`MAX_RESOURCE_NAME_LEN`]. Lowercase alphanumerics and hyphens,
/// starting with a letter.
pub fn resource_name(prefix: &str, instance_id: &str) -> String {
    let sanitized: String = prefix
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(MAX_PREFIX_LEN)
        .collect();
    let mut head = sanitized.trim_matches('-').to_string();
    if !head.starts_with(|c: char| c.is_ascii_alphabetic()) {
        head.insert(0, 'x');
    }

    let digest = hex::encode(Sha256::digest(instance_id.as_bytes()));
    let room = MAX_RESOURCE_NAME_LEN - head.len() - 1;
    format!("{head}-{}", &digest[..room])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            LifecycleStatus::Requested,
            LifecycleStatus::ProvisioningFailed,
            LifecycleStatus::ModifyFailed,
            LifecycleStatus::DeletionFailed,
            LifecycleStatus::Bound,
        ] {
            assert_eq!(LifecycleStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LifecycleStatus::parse("available"), None);
    }

    #[test]
    fn test_last_operation_tri_state() {
        assert_eq!(
            LastOperationState::from(LifecycleStatus::Provisioning),
            LastOperationState::InProgress
        );
        assert_eq!(
            LastOperationState::from(LifecycleStatus::Deleted),
            LastOperationState::Succeeded
        );
        assert_eq!(
            LastOperationState::from(LifecycleStatus::ModifyFailed),
            LastOperationState::Failed
        );
    }

    #[test]
    fn test_usable_statuses() {
        assert!(LifecycleStatus::Ready.is_usable());
        assert!(LifecycleStatus::Bound.is_usable());
        assert!(LifecycleStatus::ModifyFailed.is_usable());
        assert!(!LifecycleStatus::ProvisioningFailed.is_usable());
        assert!(!LifecycleStatus::DeletionFailed.is_usable());
        assert!(!LifecycleStatus::Requested.is_usable());
    }

    #[test]
    fn test_resource_name_is_provider_safe() {
        let name = resource_name("stratus", "6F1D2C3B-AAAA-BBBB-CCCC-0123456789ab");
        assert_eq!(name.len(), MAX_RESOURCE_NAME_LEN);
        assert!(name.starts_with("stratus-"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));

        let odd = resource_name("9_Team.Prefix-With-Extra-Words", "inst-1");
        assert!(odd.len() <= MAX_RESOURCE_NAME_LEN);
        assert!(odd.starts_with("x9-team-prefix"));
        assert_eq!(resource_name("", "inst-1").len(), MAX_RESOURCE_NAME_LEN);
    }

    #[test]
    fn test_resource_name_distinguishes_ids_sharing_a_long_prefix() {
        let a = resource_name("stratus", "6f1d2c3b-aaaa-bbbb-cccc-0123456789ab");
        let b = resource_name("stratus", "6f1d2c3b-aaaa-bbbb-cccc-01234567ffff");
        assert_ne!(a, b);
        assert_eq!(a, resource_name("stratus", "6f1d2c3b-aaaa-bbbb-cccc-0123456789ab"));

        // case is significant in ids
        assert_ne!(
            resource_name("stratus", "Inst-1"),
            resource_name("stratus", "inst-1")
        );
    }

    #[test]
    fn test_apply_options_changes_only_given_fields() {
        let mut record = crate::testing::record("inst-1", LifecycleStatus::Ready);
        record.engine_version = Some("6.0".to_string());
        record.allocated_storage_gb = Some(20);

        record.apply_options(&InstanceOptions {
            engine_version: Some("7.0".to_string()),
            allocated_storage: None,
        });

        assert_eq!(record.engine_version.as_deref(), Some("7.0"));
        assert_eq!(record.allocated_storage_gb, Some(20));
    }
}
