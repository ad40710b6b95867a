//! Service catalog: the read-only set of services and plans offered.
//!
//! The catalog is loaded once at startup from a TOML document and shared
//! immutably afterwards.
//!
//! ```toml
//! [[service]]
//! id = "db-service"
//! name = "aws-rds"
//!
//! [[service.plan]]
//! id = "pg-micro"
//! name = "micro-psql"
//! family = "postgres-dedicated"
//! engine = "postgres"
//! tenancy = "dedicated"
//! approved_major_versions = ["15", "16"]
//! default_version = "16"
//! instance_class = "db.t3.micro"
//! allocated_storage_gb = 20
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tags::{check_reserved, TagError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("plan {0} not found in catalog")]
    UnknownPlan(String),

    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate plan id in catalog: {0}")]
    DuplicatePlan(String),

    #[error("plan {plan}: {source}")]
    PlanTags {
        plan: String,
        #[source]
        source: TagError,
    },
}

/// Data-store engine backing a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    Mysql,
    Redis,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Redis => "redis",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "postgres" => Some(Self::Postgres),
            "mysql" => Some(Self::Mysql),
            "redis" => Some(Self::Redis),
            _ => None,
        }
    }

    /// Default listening port of the engine.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mysql => 3306,
            Self::Redis => 6379,
        }
    }

    /// Relational engines have databases and logins; caches do not.
    pub fn is_relational(&self) -> bool {
        matches!(self, Self::Postgres | Self::Mysql)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How instances of a plan map onto provider resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tenancy {
    /// A logical database inside a long-lived pool.
    Shared,
    /// One provider resource per instance.
    Dedicated,
}

impl Tenancy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Dedicated => "dedicated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shared" => Some(Self::Shared),
            "dedicated" => Some(Self::Dedicated),
            _ => None,
        }
    }
}

impl fmt::Display for Tenancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioning template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Plans in the same family can be switched between by a modify.
    pub family: String,
    pub engine: Engine,
    pub tenancy: Tenancy,
    #[serde(default)]
    pub approved_major_versions: Vec<String>,
    #[serde(default)]
    pub default_version: Option<String>,
    #[serde(default)]
    pub instance_class: Option<String>,
    #[serde(default)]
    pub allocated_storage_gb: Option<u32>,
    #[serde(default)]
    pub node_count: Option<u32>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Plan {
    /// Returns true if the plan allows the given engine version.
    pub fn check_version(&self, version: &str) -> bool {
        self.approved_major_versions.iter().any(|v| v == version)
    }

    /// Returns true if a record provisioned from `self` may move to `other`.
    pub fn same_family(&self, other: &Plan) -> bool {
        self.family == other.family && self.engine == other.engine && self.tenancy == other.tenancy
    }
}

/// A service offering and its plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "plan", default)]
    pub plans: Vec<Plan>,
}

/// A plan together with the service that offers it.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPlan<'a> {
    pub service: &'a Service,
    pub plan: &'a Plan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(rename = "service", default)]
    pub services: Vec<Service>,
}

impl Catalog {
    /// Parse a catalog from TOML, rejecting duplicate plan ids.
    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = toml::from_str(raw)?;

        let mut seen = std::collections::HashSet::new();
        for plan in catalog.services.iter().flat_map(|s| s.plans.iter()) {
            if !seen.insert(plan.id.as_str()) {
                return Err(CatalogError::DuplicatePlan(plan.id.clone()));
            }
            check_reserved(&plan.tags).map_err(|source| CatalogError::PlanTags {
                plan: plan.id.clone(),
                source,
            })?;
        }

        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn fetch_plan(&self, plan_id: &str) -> Result<ResolvedPlan<'_>, CatalogError> {
        self.services
            .iter()
            .find_map(|service| {
                service
                    .plans
                    .iter()
                    .find(|p| p.id == plan_id)
                    .map(|plan| ResolvedPlan { service, plan })
            })
            .ok_or_else(|| CatalogError::UnknownPlan(plan_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[[service]]
id = "db-service"
name = "aws-rds"

[[service.plan]]
id = "pg-micro"
name = "micro-psql"
family = "postgres-dedicated"
engine = "postgres"
tenancy = "dedicated"
approved_major_versions = ["15", "16"]
default_version = "16"
allocated_storage_gb = 20

[service.plan.tags]
plan-tag = "micro"

[[service]]
id = "cache-service"
name = "aws-elasticache-redis"

[[service.plan]]
id = "redis-dev"
name = "redis-dev"
family = "redis"
engine = "redis"
tenancy = "dedicated"
approved_major_versions = ["7.0"]
"#;

    #[test]
    fn test_fetch_plan_resolves_service() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let resolved = catalog.fetch_plan("redis-dev").unwrap();

        assert_eq!(resolved.service.name, "aws-elasticache-redis");
        assert_eq!(resolved.plan.engine, Engine::Redis);
        assert!(resolved.plan.check_version("7.0"));
        assert!(!resolved.plan.check_version("6.2"));
    }

    #[test]
    fn test_plan_tags_are_loaded() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        let plan = catalog.fetch_plan("pg-micro").unwrap().plan;
        assert_eq!(plan.tags.get("plan-tag").map(String::as_str), Some("micro"));
        assert_eq!(plan.allocated_storage_gb, Some(20));
    }

    #[test]
    fn test_unknown_plan() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        assert!(matches!(
            catalog.fetch_plan("nope"),
            Err(CatalogError::UnknownPlan(_))
        ));
    }

    #[test]
    fn test_duplicate_plan_ids_rejected() {
        let raw = format!("{CATALOG}\n[[service.plan]]\nid = \"redis-dev\"\nname = \"x\"\nfamily = \"redis\"\nengine = \"redis\"\ntenancy = \"dedicated\"\n");
        assert!(matches!(
            Catalog::from_toml_str(&raw),
            Err(CatalogError::DuplicatePlan(_))
        ));
    }

    #[test]
    fn test_plan_tags_with_generated_keys_rejected() {
        let raw = format!("{CATALOG}\n[[service.plan]]\nid = \"pg-tagged\"\nname = \"x\"\nfamily = \"postgres\"\nengine = \"postgres\"\ntenancy = \"dedicated\"\ntags = {{ broker = \"other\" }}\n");
        match Catalog::from_toml_str(&raw) {
            Err(CatalogError::PlanTags { plan, source }) => {
                assert_eq!(plan, "pg-tagged");
                assert!(matches!(source, TagError::ReservedKey(ref key) if key == "broker"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(&path, CATALOG).unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.services.len(), 2);
    }
}
