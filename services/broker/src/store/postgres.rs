//! Postgres record store.
//!
//! Records live in the `instances` table; see `migrations/`. The primary
//! key on `instance_id` is what rejects duplicate creates.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info};

use super::{InstanceStore, StoreError};
use crate::catalog::{Engine, Tenancy};
use crate::credentials::EncryptedPassword;
use crate::record::{InstanceRecord, LifecycleStatus, ResourceHandle};

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/stratus".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/stratus".to_string());

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..Default::default()
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Run pending migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/broker/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator
                        .run(&self.pool)
                        .await
                        .map_err(StoreError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(StoreError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    pub fn instance_store(&self) -> PgInstanceStore {
        PgInstanceStore::new(self.pool.clone())
    }
}

/// Record store backed by the `instances` table.
#[derive(Clone)]
pub struct PgInstanceStore {
    pool: PgPool,
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        instance_id,
        organization_guid,
        space_guid,
        service_id,
        plan_id,
        engine,
        tenancy,
        engine_version,
        allocated_storage_gb,
        status,
        username,
        password_key_id,
        password_nonce,
        password_ciphertext,
        resource_name,
        database_name,
        resource_host,
        resource_port,
        tags,
        created_at,
        updated_at
    FROM instances
"#;

fn corrupt(instance_id: &str, reason: impl Into<String>) -> sqlx::Error {
    sqlx::Error::Decode(
        format!("instance {instance_id}: {}", reason.into()).into(),
    )
}

fn storage_column(record: &InstanceRecord) -> Result<Option<i32>, StoreError> {
    record
        .allocated_storage_gb
        .map(|gb| {
            i32::try_from(gb).map_err(|_| StoreError::OutOfRange {
                instance_id: record.instance_id.clone(),
                field: "allocated_storage_gb",
                value: u64::from(gb),
            })
        })
        .transpose()
}

impl<'r> sqlx::FromRow<'r, PgRow> for InstanceRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let instance_id: String = row.try_get("instance_id")?;

        let engine: String = row.try_get("engine")?;
        let engine = Engine::parse(&engine)
            .ok_or_else(|| corrupt(&instance_id, format!("unknown engine {engine}")))?;

        let tenancy: String = row.try_get("tenancy")?;
        let tenancy = Tenancy::parse(&tenancy)
            .ok_or_else(|| corrupt(&instance_id, format!("unknown tenancy {tenancy}")))?;

        let status: String = row.try_get("status")?;
        let status = LifecycleStatus::parse(&status)
            .ok_or_else(|| corrupt(&instance_id, format!("unknown status {status}")))?;

        let allocated_storage_gb: Option<i32> = row.try_get("allocated_storage_gb")?;
        let allocated_storage_gb = allocated_storage_gb
            .map(|gb| {
                u32::try_from(gb)
                    .map_err(|_| corrupt(&instance_id, format!("negative allocated storage {gb}")))
            })
            .transpose()?;
        let resource_port: Option<i32> = row.try_get("resource_port")?;
        let tags: Json<BTreeMap<String, String>> = row.try_get("tags")?;

        Ok(Self {
            organization_guid: row.try_get("organization_guid")?,
            space_guid: row.try_get("space_guid")?,
            service_id: row.try_get("service_id")?,
            plan_id: row.try_get("plan_id")?,
            engine,
            tenancy,
            engine_version: row.try_get("engine_version")?,
            allocated_storage_gb,
            status,
            username: row.try_get("username")?,
            password: EncryptedPassword {
                key_id: row.try_get("password_key_id")?,
                nonce: row.try_get("password_nonce")?,
                ciphertext: row.try_get("password_ciphertext")?,
            },
            resource: ResourceHandle {
                name: row.try_get("resource_name")?,
                database_name: row.try_get("database_name")?,
                host: row.try_get("resource_host")?,
                port: resource_port.and_then(|v| u16::try_from(v).ok()),
            },
            tags: tags.0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            instance_id,
        })
    }
}

fn map_query_error(instance_id: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Decode(reason) => StoreError::Corrupt {
            instance_id: instance_id.to_string(),
            reason: reason.to_string(),
        },
        other => StoreError::Query(other),
    }
}

impl PgInstanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceStore for PgInstanceStore {
    async fn create(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let storage = storage_column(record)?;
        let result = sqlx::query(
            r#"
            INSERT INTO instances (
                instance_id,
                organization_guid,
                space_guid,
                service_id,
                plan_id,
                engine,
                tenancy,
                engine_version,
                allocated_storage_gb,
                status,
                username,
                password_key_id,
                password_nonce,
                password_ciphertext,
                resource_name,
                database_name,
                resource_host,
                resource_port,
                tags,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (instance_id) DO NOTHING
            "#,
        )
        .bind(&record.instance_id)
        .bind(&record.organization_guid)
        .bind(&record.space_guid)
        .bind(&record.service_id)
        .bind(&record.plan_id)
        .bind(record.engine.as_str())
        .bind(record.tenancy.as_str())
        .bind(&record.engine_version)
        .bind(storage)
        .bind(record.status.as_str())
        .bind(&record.username)
        .bind(&record.password.key_id)
        .bind(&record.password.nonce)
        .bind(&record.password.ciphertext)
        .bind(&record.resource.name)
        .bind(&record.resource.database_name)
        .bind(&record.resource.host)
        .bind(record.resource.port.map(i32::from))
        .bind(Json(&record.tags))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(record.instance_id.clone()));
        }

        debug!(instance_id = %record.instance_id, status = %record.status, "Inserted instance record");
        Ok(())
    }

    async fn get(&self, instance_id: &str) -> Result<InstanceRecord, StoreError> {
        let query = format!("{SELECT_COLUMNS} WHERE instance_id = $1");
        sqlx::query_as::<_, InstanceRecord>(&query)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_query_error(instance_id, e))?
            .ok_or_else(|| StoreError::NotFound(instance_id.to_string()))
    }

    async fn update(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let storage = storage_column(record)?;
        let result = sqlx::query(
            r#"
            UPDATE instances SET
                plan_id = $2,
                engine_version = $3,
                allocated_storage_gb = $4,
                status = $5,
                username = $6,
                password_key_id = $7,
                password_nonce = $8,
                password_ciphertext = $9,
                resource_name = $10,
                database_name = $11,
                resource_host = $12,
                resource_port = $13,
                tags = $14,
                updated_at = $15
            WHERE instance_id = $1
            "#,
        )
        .bind(&record.instance_id)
        .bind(&record.plan_id)
        .bind(&record.engine_version)
        .bind(storage)
        .bind(record.status.as_str())
        .bind(&record.username)
        .bind(&record.password.key_id)
        .bind(&record.password.nonce)
        .bind(&record.password.ciphertext)
        .bind(&record.resource.name)
        .bind(&record.resource.database_name)
        .bind(&record.resource.host)
        .bind(record.resource.port.map(i32::from))
        .bind(Json(&record.tags))
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.instance_id.clone()));
        }

        debug!(instance_id = %record.instance_id, status = %record.status, "Updated instance record");
        Ok(())
    }

    async fn delete(&self, instance_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM instances WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(instance_id.to_string()));
        }

        debug!(instance_id = %instance_id, "Deleted instance record");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        let query = format!("{SELECT_COLUMNS} ORDER BY instance_id");
        sqlx::query_as::<_, InstanceRecord>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_query_error("*", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_column_rejects_values_beyond_integer_range() {
        let mut record = crate::testing::record("inst-1", LifecycleStatus::Ready);
        record.allocated_storage_gb = Some(3_000_000_000);
        match storage_column(&record) {
            Err(StoreError::OutOfRange {
                instance_id, value, ..
            }) => {
                assert_eq!(instance_id, "inst-1");
                assert_eq!(value, 3_000_000_000);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        record.allocated_storage_gb = Some(i32::MAX as u32);
        assert_eq!(storage_column(&record).unwrap(), Some(i32::MAX));

        record.allocated_storage_gb = None;
        assert_eq!(storage_column(&record).unwrap(), None);
    }

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
    }
}
