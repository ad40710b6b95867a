//! Shared harness: orchestrator and sweeper over in-memory backends.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use stratus_broker::adapter::AdapterFactory;
use stratus_broker::broker::{Broker, BrokerSettings, ModifyRequest, ProvisionRequest};
use stratus_broker::catalog::Catalog;
use stratus_broker::credentials::CredentialCodec;
use stratus_broker::platform::MemoryPlatform;
use stratus_broker::provider::MemoryProvider;
use stratus_broker::store::MemoryInstanceStore;
use stratus_broker::sweeper::{Sweeper, SweeperSettings};
use stratus_broker::tags::BrokerTagManager;
use stratus_reconcile::{RepairPolicy, StaleRecordAction};

pub const CATALOG: &str = r#"
[[service]]
id = "svc-rds"
name = "stratus-rds"
description = "Managed relational databases"

[[service.plan]]
id = "pg-micro"
name = "micro-psql"
family = "postgres-standard"
engine = "postgres"
tenancy = "dedicated"
approved_major_versions = ["15", "16"]
default_version = "15"
instance_class = "db.small"
allocated_storage_gb = 20
tags = { a = "1", tier = "micro" }

[[service.plan]]
id = "pg-medium"
name = "medium-psql"
family = "postgres-standard"
engine = "postgres"
tenancy = "dedicated"
approved_major_versions = ["15", "16"]
default_version = "15"
instance_class = "db.medium"
allocated_storage_gb = 20

[[service.plan]]
id = "mysql-micro"
name = "micro-mysql"
family = "mysql-standard"
engine = "mysql"
tenancy = "dedicated"
approved_major_versions = ["8.0"]
default_version = "8.0"
allocated_storage_gb = 20

[[service.plan]]
id = "pg-shared"
name = "shared-psql"
family = "postgres-shared"
engine = "postgres"
tenancy = "shared"

[[service]]
id = "svc-redis"
name = "stratus-redis"

[[service.plan]]
id = "redis-dev"
name = "redis-dev"
family = "redis"
engine = "redis"
tenancy = "dedicated"
approved_major_versions = ["5.0"]
default_version = "5.0"
node_count = 1
"#;

pub struct Harness {
    pub broker: Broker,
    pub sweeper: Sweeper,
    pub store: Arc<MemoryInstanceStore>,
    pub provider: Arc<MemoryProvider>,
    pub platform: Arc<MemoryPlatform>,
    pub codec: Arc<CredentialCodec>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(Duration::from_secs(5), StaleRecordAction::Report)
    }

    pub fn with_options(provider_timeout: Duration, stale_record: StaleRecordAction) -> Self {
        let store = Arc::new(MemoryInstanceStore::new());
        let provider = Arc::new(MemoryProvider::new());
        let platform = Arc::new(MemoryPlatform::new());
        let codec = Arc::new(CredentialCodec::new([42; 32]));

        let broker = Broker::new(
            Arc::new(Catalog::from_toml_str(CATALOG).unwrap()),
            store.clone(),
            codec.clone(),
            Arc::new(BrokerTagManager::new("stratus", "test")),
            AdapterFactory::new(provider.clone(), provider.clone()),
            BrokerSettings {
                provider_timeout,
                ..Default::default()
            },
        );

        let sweeper = Sweeper::new(
            store.clone(),
            provider.clone(),
            provider.clone(),
            platform.clone(),
            SweeperSettings {
                policy: RepairPolicy { stale_record },
                max_retries: 1,
                lookup_timeout: provider_timeout,
                ..Default::default()
            },
        );

        Self {
            broker,
            sweeper,
            store,
            provider,
            platform,
            codec,
        }
    }

    /// Create an instance, let the provider finish, and poll it to ready.
    /// The platform is told it owns the instance.
    pub async fn ready_instance(&self, instance_id: &str, plan_id: &str) {
        self.broker
            .create(provision(instance_id, plan_id))
            .await
            .unwrap();
        self.provider.complete_pending().await;
        self.broker.last_operation(instance_id).await.unwrap();
        self.platform.insert(instance_id).await;
    }
}

pub fn provision(instance_id: &str, plan_id: &str) -> ProvisionRequest {
    ProvisionRequest {
        instance_id: instance_id.to_string(),
        service_id: String::new(),
        plan_id: plan_id.to_string(),
        organization_guid: "org-guid".to_string(),
        space_guid: "space-guid".to_string(),
        raw_options: Vec::new(),
        tags: BTreeMap::new(),
    }
}

pub fn modify(instance_id: &str, plan_id: Option<&str>, raw: &str) -> ModifyRequest {
    ModifyRequest {
        instance_id: instance_id.to_string(),
        plan_id: plan_id.map(String::from),
        raw_options: raw.as_bytes().to_vec(),
    }
}
