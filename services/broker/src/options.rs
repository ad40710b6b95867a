//! Request parameters accepted on create and modify.

use serde::Deserialize;
use thiserror::Error;

use crate::catalog::{Plan, Tenancy};
use crate::record::InstanceRecord;

/// Largest `allocatedStorage` the record store can hold.
pub const MAX_ALLOCATED_STORAGE_GB: u32 = i32::MAX as u32;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("{0}")]
    Malformed(#[from] serde_json::Error),

    #[error("{version} is not a supported major version; major version must be one of: {}", .approved.join(", "))]
    UnsupportedVersion {
        version: String,
        approved: Vec<String>,
    },

    #[error("{option} cannot be set on shared plans")]
    NotSupportedOnShared { option: &'static str },

    #[error("allocatedStorage is only supported for database plans")]
    StorageNotSupported,

    #[error("allocatedStorage {requested} is below the plan minimum of {minimum}")]
    StorageBelowPlan { requested: u32, minimum: u32 },

    #[error("allocatedStorage {requested} exceeds the maximum of {maximum}")]
    StorageTooLarge { requested: u32, maximum: u32 },

    #[error("allocatedStorage cannot shrink from {current} to {requested}")]
    StorageShrink { requested: u32, current: u32 },
}

/// Options parsed from the raw request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOptions {
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default)]
    pub allocated_storage: Option<u32>,
}

impl InstanceOptions {
    /// Parse raw JSON parameters and validate them against a plan.
    ///
    /// Empty input yields the defaults. Unknown fields are ignored.
    pub fn parse(raw: &[u8], plan: &Plan) -> Result<Self, OptionsError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let options: Self = serde_json::from_slice(raw)?;
        options.validate(plan)?;
        Ok(options)
    }

    pub fn validate(&self, plan: &Plan) -> Result<(), OptionsError> {
        if plan.tenancy == Tenancy::Shared {
            if self.engine_version.is_some() {
                return Err(OptionsError::NotSupportedOnShared {
                    option: "engineVersion",
                });
            }
            if self.allocated_storage.is_some() {
                return Err(OptionsError::NotSupportedOnShared {
                    option: "allocatedStorage",
                });
            }
        }

        if let Some(version) = &self.engine_version {
            if !plan.check_version(version) {
                return Err(OptionsError::UnsupportedVersion {
                    version: version.clone(),
                    approved: plan.approved_major_versions.clone(),
                });
            }
        }

        if let Some(requested) = self.allocated_storage {
            if !plan.engine.is_relational() {
                return Err(OptionsError::StorageNotSupported);
            }
            let minimum = plan.allocated_storage_gb.unwrap_or(0);
            if requested < minimum {
                return Err(OptionsError::StorageBelowPlan { requested, minimum });
            }
            if requested > MAX_ALLOCATED_STORAGE_GB {
                return Err(OptionsError::StorageTooLarge {
                    requested,
                    maximum: MAX_ALLOCATED_STORAGE_GB,
                });
            }
        }

        Ok(())
    }

    /// Additional checks that depend on the record being modified.
    pub fn validate_modification(&self, record: &InstanceRecord) -> Result<(), OptionsError> {
        if let (Some(requested), Some(current)) =
            (self.allocated_storage, record.allocated_storage_gb)
        {
            if requested < current {
                return Err(OptionsError::StorageShrink { requested, current });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Engine;
    use crate::record::LifecycleStatus;
    use crate::testing;

    fn redis_plan(approved: &[&str]) -> Plan {
        let mut plan = testing::plan("redis-dev", Engine::Redis, Tenancy::Dedicated);
        plan.approved_major_versions = approved.iter().map(|v| v.to_string()).collect();
        plan
    }

    #[test]
    fn test_invalid_engine_version_names_approved_set() {
        let options = InstanceOptions {
            engine_version: Some("4.1".to_string()),
            allocated_storage: None,
        };
        let err = options.validate(&redis_plan(&["5.0"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "4.1 is not a supported major version; major version must be one of: 5.0"
        );
    }

    #[test]
    fn test_parse_nothing_specified() {
        let options = InstanceOptions::parse(b"", &redis_plan(&["7.0"])).unwrap();
        assert_eq!(options, InstanceOptions::default());
    }

    #[test]
    fn test_parse_ignores_unknown_fields() {
        let options =
            InstanceOptions::parse(br#"{"engine_version": "7.0"}"#, &redis_plan(&["7.0"])).unwrap();
        assert_eq!(options, InstanceOptions::default());
    }

    #[test]
    fn test_parse_unsupported_version() {
        let err = InstanceOptions::parse(
            br#"{"engineVersion": "9.0"}"#,
            &redis_plan(&["7.0", "8.0"]),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "9.0 is not a supported major version; major version must be one of: 7.0, 8.0"
        );
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = InstanceOptions::parse(b"{not json", &redis_plan(&["7.0"])).unwrap_err();
        assert!(matches!(err, OptionsError::Malformed(_)));
    }

    #[test]
    fn test_storage_rules() {
        let mut plan = testing::plan("pg", Engine::Postgres, Tenancy::Dedicated);
        plan.allocated_storage_gb = Some(20);

        let too_small = InstanceOptions {
            engine_version: None,
            allocated_storage: Some(10),
        };
        assert!(matches!(
            too_small.validate(&plan),
            Err(OptionsError::StorageBelowPlan { .. })
        ));

        let on_cache = InstanceOptions {
            engine_version: None,
            allocated_storage: Some(50),
        };
        assert!(matches!(
            on_cache.validate(&redis_plan(&[])),
            Err(OptionsError::StorageNotSupported)
        ));
    }

    #[test]
    fn test_storage_above_column_range_is_rejected() {
        let plan = testing::plan("pg", Engine::Postgres, Tenancy::Dedicated);

        let err = InstanceOptions::parse(br#"{"allocatedStorage": 3000000000}"#, &plan).unwrap_err();
        assert!(matches!(
            err,
            OptionsError::StorageTooLarge {
                requested: 3_000_000_000,
                maximum: MAX_ALLOCATED_STORAGE_GB,
            }
        ));

        let largest = InstanceOptions {
            engine_version: None,
            allocated_storage: Some(MAX_ALLOCATED_STORAGE_GB),
        };
        assert!(largest.validate(&plan).is_ok());
    }

    #[test]
    fn test_storage_cannot_shrink_on_modify() {
        let mut record = testing::record("inst-1", LifecycleStatus::Ready);
        record.allocated_storage_gb = Some(100);

        let shrink = InstanceOptions {
            engine_version: None,
            allocated_storage: Some(50),
        };
        assert!(matches!(
            shrink.validate_modification(&record),
            Err(OptionsError::StorageShrink { .. })
        ));
    }

    #[test]
    fn test_shared_plans_reject_engine_options() {
        let plan = testing::plan("shared-pg", Engine::Postgres, Tenancy::Shared);
        let options = InstanceOptions {
            engine_version: Some("16".to_string()),
            allocated_storage: None,
        };
        assert!(matches!(
            options.validate(&plan),
            Err(OptionsError::NotSupportedOnShared { .. })
        ));
    }
}
