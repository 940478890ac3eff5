//! Postgres backend (sqlx)
//!
//! - The administrative pool is shared: it provisions schemas, inspects
//!   indexes before a tenant is cached, and serves the tenant registry.
//! - Every tenant connection is its own small `PgPool` whose sessions pin
//!   `search_path` to the tenant schema. The pool is verified with
//!   `SELECT 1` before the handle is handed out.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::debug;

use crate::catalog::{Catalog, ConnectionHandle, Connector, SchemaIndex};
use crate::error::DbResult;
use crate::model::Entity;
use crate::repository::Repository;
use crate::sql::{qualified, quote_ident};

/// Default maximum connections for the administrative pool.
const DEFAULT_ADMIN_MAX_CONNECTIONS: u32 = 5;

const LIST_INDEXES_SQL: &str = r#"
    SELECT t.relname AS table_name, i.relname AS index_name
    FROM pg_index x
    JOIN pg_class i ON i.oid = x.indexrelid
    JOIN pg_class t ON t.oid = x.indrelid
    JOIN pg_namespace n ON n.oid = i.relnamespace
    WHERE n.nspname = $1
      AND NOT x.indisprimary
      AND NOT EXISTS (SELECT 1 FROM pg_constraint c WHERE c.conindid = x.indexrelid)
    ORDER BY t.relname, i.relname
"#;

/// Create the administrative PostgreSQL pool.
pub async fn create_admin_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    create_admin_pool_with_options(database_url, DEFAULT_ADMIN_MAX_CONNECTIONS).await
}

pub async fn create_admin_pool_with_options(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

async fn schema_exists(pool: &PgPool, schema: &str) -> DbResult<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
    )
    .bind(schema)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

async fn create_schema(pool: &PgPool, schema: &str) -> DbResult<()> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))
        .execute(pool)
        .await?;
    Ok(())
}

async fn list_indexes(pool: &PgPool, schema: &str) -> DbResult<Vec<SchemaIndex>> {
    let rows = sqlx::query_as::<_, (String, String)>(LIST_INDEXES_SQL)
        .bind(schema)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(table, name)| SchemaIndex::new(table, name))
        .collect())
}

async fn drop_index(pool: &PgPool, schema: &str, index: &str) -> DbResult<()> {
    sqlx::query(&format!("DROP INDEX IF EXISTS {}", qualified(schema, index)))
        .execute(pool)
        .await?;
    Ok(())
}

/// The administrative connection.
#[derive(Clone)]
pub struct PgAdmin {
    pool: PgPool,
}

impl PgAdmin {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Catalog for PgAdmin {
    async fn schema_exists(&self, schema: &str) -> DbResult<bool> {
        schema_exists(&self.pool, schema).await
    }

    async fn create_schema(&self, schema: &str) -> DbResult<()> {
        create_schema(&self.pool, schema).await
    }

    async fn list_indexes(&self, schema: &str) -> DbResult<Vec<SchemaIndex>> {
        list_indexes(&self.pool, schema).await
    }

    async fn drop_index(&self, schema: &str, index: &str) -> DbResult<()> {
        drop_index(&self.pool, schema, index).await
    }
}

/// A tenant connection: a pool whose sessions are bound to one schema.
#[derive(Clone)]
pub struct PgTenantConnection {
    schema: Arc<str>,
    pool: PgPool,
}

impl PgTenantConnection {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Typed data access for one entity in this tenant's schema.
    pub fn repository<E: Entity>(&self) -> Repository<'_, E> {
        Repository::new(&self.pool, &self.schema)
    }
}

impl std::fmt::Debug for PgTenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTenantConnection")
            .field("schema", &self.schema)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

#[async_trait]
impl Catalog for PgTenantConnection {
    async fn schema_exists(&self, schema: &str) -> DbResult<bool> {
        schema_exists(&self.pool, schema).await
    }

    async fn create_schema(&self, schema: &str) -> DbResult<()> {
        create_schema(&self.pool, schema).await
    }

    async fn list_indexes(&self, schema: &str) -> DbResult<Vec<SchemaIndex>> {
        list_indexes(&self.pool, schema).await
    }

    async fn drop_index(&self, schema: &str, index: &str) -> DbResult<()> {
        drop_index(&self.pool, schema, index).await
    }
}

#[async_trait]
impl ConnectionHandle for PgTenantConnection {
    fn schema_name(&self) -> &str {
        &self.schema
    }

    async fn close(&self) -> DbResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Opens schema-bound pools against one Postgres server.
pub struct PgConnector {
    admin: PgAdmin,
    options: PgConnectOptions,
    max_connections_per_tenant: u32,
}

impl PgConnector {
    pub fn new(admin: PgPool, options: PgConnectOptions, max_connections_per_tenant: u32) -> Self {
        Self {
            admin: PgAdmin::new(admin),
            options,
            max_connections_per_tenant,
        }
    }

    /// Connect the administrative pool and reuse its URL for tenant pools.
    pub async fn from_url(database_url: &str, max_connections_per_tenant: u32) -> DbResult<Self> {
        let options: PgConnectOptions = database_url.parse()?;
        let admin = create_admin_pool(database_url).await?;
        Ok(Self::new(admin, options, max_connections_per_tenant))
    }

    pub fn admin_pool(&self) -> &PgPool {
        self.admin.pool()
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Handle = PgTenantConnection;
    type Admin = PgAdmin;

    async fn connect(&self, schema: &str) -> DbResult<PgTenantConnection> {
        let set_search_path = format!("SET search_path TO {}", quote_ident(schema));

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections_per_tenant)
            .after_connect(move |conn, _meta| {
                let statement = set_search_path.clone();
                Box::pin(async move {
                    sqlx::query(&statement).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_lazy_with(self.options.clone());

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(e.into());
        }

        debug!(schema = %schema, "opened tenant pool");
        Ok(PgTenantConnection {
            schema: Arc::from(schema),
            pool,
        })
    }

    fn admin(&self) -> &PgAdmin {
        &self.admin
    }
}
