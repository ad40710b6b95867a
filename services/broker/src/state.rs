//! Process-wide wiring of the orchestrator and sweeper.

use std::sync::Arc;

use anyhow::{Context, Result};
use stratus_reconcile::RepairPolicy;
use tracing::info;

use crate::adapter::AdapterFactory;
use crate::broker::{Broker, BrokerSettings};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::credentials::CredentialCodec;
use crate::platform::{HttpPlatformOwnership, MemoryPlatform, PlatformOwnership};
use crate::provider::{
    HttpResourceApi, MemoryProvider, PgSharedPool, PoolEndpoint, ResourceApi, SharedPoolApi,
};
use crate::store::{Database, InstanceStore, MemoryInstanceStore};
use crate::sweeper::{Sweeper, SweeperSettings};
use crate::tags::BrokerTagManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    broker: Broker,
    sweeper: Arc<Sweeper>,
}

/// External collaborators the state is assembled from.
pub struct Backends {
    pub store: Arc<dyn InstanceStore>,
    pub resources: Arc<dyn ResourceApi>,
    pub pool: Arc<dyn SharedPoolApi>,
    pub platform: Arc<dyn PlatformOwnership>,
}

impl Backends {
    /// In-memory fakes for every collaborator.
    pub fn in_memory() -> Self {
        let provider = Arc::new(MemoryProvider::new());
        Self {
            store: Arc::new(MemoryInstanceStore::new()),
            resources: provider.clone(),
            pool: provider,
            platform: Arc::new(MemoryPlatform::new()),
        }
    }

    /// Real clients built from configuration.
    pub async fn connect(config: &Config) -> Result<Self> {
        let db = Database::connect(&config.database)
            .await
            .context("failed to connect to record store")?;
        db.health_check()
            .await
            .context("record store health check failed")?;

        let provider_url = config
            .provider_url
            .as_deref()
            .context("STRATUS_PROVIDER_URL is required")?;
        let resources = HttpResourceApi::new(
            provider_url,
            config.provider_token.as_deref(),
            config.provider_timeout,
        )?;

        let pool_url = config
            .shared_pool_url
            .as_deref()
            .context("STRATUS_SHARED_POOL_URL is required")?;
        let pool = PgSharedPool::connect(
            pool_url,
            PoolEndpoint {
                host: config.shared_pool_host.clone(),
                port: config.shared_pool_port,
            },
            4,
        )
        .await?;

        let platform_url = config
            .platform_api_url
            .as_deref()
            .context("STRATUS_PLATFORM_API_URL is required")?;
        let platform = HttpPlatformOwnership::new(
            platform_url,
            config.platform_token.as_deref(),
            config.provider_timeout,
        )?;

        Ok(Self {
            store: Arc::new(db.instance_store()),
            resources: Arc::new(resources),
            pool: Arc::new(pool),
            platform: Arc::new(platform),
        })
    }
}

impl AppState {
    /// Assemble state from configuration. The `test` environment runs
    /// entirely in memory.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let catalog = Catalog::load(&config.catalog_path).with_context(|| {
            format!("failed to load catalog {}", config.catalog_path.display())
        })?;
        let codec = CredentialCodec::from_env().context("failed to load encryption key")?;
        info!(key_id = %codec.key_id(), "Encryption key loaded");

        let backends = if config.is_test() {
            info!("Using in-memory backends");
            Backends::in_memory()
        } else {
            Backends::connect(config).await?
        };

        Ok(Self::new(config, catalog, codec, backends))
    }

    pub fn new(
        config: &Config,
        catalog: Catalog,
        codec: CredentialCodec,
        backends: Backends,
    ) -> Self {
        let broker = Broker::new(
            Arc::new(catalog),
            backends.store.clone(),
            Arc::new(codec),
            Arc::new(BrokerTagManager::new(
                config.broker_name.clone(),
                config.environment.clone(),
            )),
            AdapterFactory::new(backends.resources.clone(), backends.pool.clone()),
            BrokerSettings {
                provider_timeout: config.provider_timeout,
                resource_prefix: config.resource_prefix.clone(),
            },
        );

        let sweeper = Sweeper::new(
            backends.store,
            backends.resources,
            backends.pool,
            backends.platform,
            SweeperSettings {
                policy: RepairPolicy {
                    stale_record: config.stale_record_action,
                },
                lookup_timeout: config.provider_timeout,
                ..Default::default()
            },
        );

        Self {
            inner: Arc::new(AppStateInner {
                broker,
                sweeper: Arc::new(sweeper),
            }),
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.inner.broker
    }

    pub fn sweeper(&self) -> Arc<Sweeper> {
        self.inner.sweeper.clone()
    }
}
