//! Shared-tenant pool backed by a long-lived Postgres server.
//!
//! Each instance is a login plus a database it owns. Databases created here
//! carry a `COMMENT` marker so the sweeper can tell them apart from anything
//! else living in the pool.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use super::{PoolEndpoint, SharedPoolApi};
use crate::error::ProviderError;

/// Comment placed on every database the broker creates.
const DATABASE_MARKER: &str = "stratus-broker";

const DUPLICATE_DATABASE: &str = "42P04";
const DUPLICATE_OBJECT: &str = "42710";
const TOO_MANY_CONNECTIONS: &str = "53300";

#[derive(Debug, Clone)]
pub struct PgSharedPool {
    pool: PgPool,
    endpoint: PoolEndpoint,
}

impl PgSharedPool {
    /// Connect to the pool's admin URL.
    pub async fn connect(
        admin_url: &str,
        endpoint: PoolEndpoint,
        max_connections: u32,
    ) -> Result<Self, ProviderError> {
        info!(host = %endpoint.host, port = endpoint.port, "Connecting to shared pool");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(admin_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { pool, endpoint })
    }

    pub fn new(pool: PgPool, endpoint: PoolEndpoint) -> Self {
        Self { pool, endpoint }
    }

    async fn execute(&self, statement: &str) -> Result<(), ProviderError> {
        sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

/// Quote an identifier generated by the broker. Only lowercase
/// alphanumerics and underscores are accepted.
fn quote_ident(ident: &str) -> Result<String, ProviderError> {
    let valid = !ident.is_empty()
        && ident.len() <= 63
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(ProviderError::invalid_parameters(format!(
            "invalid identifier: {ident:?}"
        )));
    }
    Ok(format!("\"{ident}\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn map_sqlx_error(err: sqlx::Error) -> ProviderError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(DUPLICATE_DATABASE) | Some(DUPLICATE_OBJECT) => {
                ProviderError::conflict(db.message().to_string())
            }
            Some(TOO_MANY_CONNECTIONS) => ProviderError::unavailable(db.message().to_string()),
            _ => ProviderError::invalid_parameters(db.message().to_string()),
        },
        _ => ProviderError::unavailable(format!("shared pool: {err}")),
    }
}

#[async_trait]
impl SharedPoolApi for PgSharedPool {
    fn endpoint(&self) -> PoolEndpoint {
        self.endpoint.clone()
    }

    async fn create_database(
        &self,
        database_name: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ProviderError> {
        let db = quote_ident(database_name)?;
        let role = quote_ident(username)?;
        debug!(database = %database_name, username = %username, "Creating shared database");

        self.execute(&format!(
            "CREATE ROLE {role} LOGIN PASSWORD {}",
            quote_literal(password)
        ))
        .await?;

        // CREATE DATABASE cannot run inside a transaction; undo the role by hand.
        if let Err(err) = self.execute(&format!("CREATE DATABASE {db} OWNER {role}")).await {
            if let Err(cleanup) = self.execute(&format!("DROP ROLE IF EXISTS {role}")).await {
                warn!(username = %username, error = %cleanup, "Failed to drop role after create failure");
            }
            return Err(err);
        }

        self.execute(&format!(
            "COMMENT ON DATABASE {db} IS {}",
            quote_literal(DATABASE_MARKER)
        ))
        .await?;
        self.execute(&format!("REVOKE ALL ON DATABASE {db} FROM PUBLIC"))
            .await
    }

    async fn drop_database(&self, database_name: &str, username: &str) -> Result<(), ProviderError> {
        let db = quote_ident(database_name)?;
        let role = quote_ident(username)?;
        debug!(database = %database_name, username = %username, "Dropping shared database");

        self.execute(&format!("DROP DATABASE IF EXISTS {db} WITH (FORCE)"))
            .await?;
        self.execute(&format!("DROP ROLE IF EXISTS {role}")).await
    }

    async fn database_exists(&self, database_name: &str) -> Result<bool, ProviderError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(database_name)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(exists)
    }

    async fn list_databases(&self) -> Result<Vec<String>, ProviderError> {
        sqlx::query_scalar(
            "SELECT datname FROM pg_database \
             WHERE NOT datistemplate AND shobj_description(oid, 'pg_database') = $1 \
             ORDER BY datname",
        )
        .bind(DATABASE_MARKER)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }
}
