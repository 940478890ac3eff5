//! Tenant registry lookup
//!
//! The registry is the shared table that maps a tenant (store) id to the
//! schema holding its data. It is read-only from the manager's point of view.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::error::DbResult;
use crate::sql::quote_ident;

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TenantRecord {
    pub tenant_id: String,
    pub schema_name: String,
    pub is_active: bool,
    pub is_deleted: bool,
}

impl TenantRecord {
    pub fn new(tenant_id: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            schema_name: schema_name.into(),
            is_active: true,
            is_deleted: false,
        }
    }
}

/// Read-only lookup of tenant records.
#[async_trait]
pub trait TenantRegistry: Send + Sync + 'static {
    /// `Ok(None)` when no record exists for `tenant_id`.
    async fn find_tenant(&self, tenant_id: &str) -> DbResult<Option<TenantRecord>>;
}

/// Registry backed by the `stores` table of the shared registry schema.
#[derive(Clone)]
pub struct PgTenantRegistry {
    pool: PgPool,
    query: String,
}

impl PgTenantRegistry {
    pub fn new(pool: PgPool, registry_schema: &str) -> Self {
        let query = format!(
            "SELECT id::text AS tenant_id, schema_name, is_active, is_deleted \
             FROM {}.stores WHERE id::text = $1",
            quote_ident(registry_schema)
        );
        Self { pool, query }
    }
}

#[async_trait]
impl TenantRegistry for PgTenantRegistry {
    async fn find_tenant(&self, tenant_id: &str) -> DbResult<Option<TenantRecord>> {
        let record = sqlx::query_as::<_, TenantRecord>(&self.query)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}

/// In-memory registry for embedding and tests.
#[derive(Default)]
pub struct MemoryRegistry {
    records: RwLock<HashMap<String, TenantRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        let registry = Self::new();
        for record in records {
            registry.insert(record);
        }
        registry
    }

    pub fn insert(&self, record: TenantRecord) {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(record.tenant_id.clone(), record);
    }

    pub fn remove(&self, tenant_id: &str) -> Option<TenantRecord> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(tenant_id)
    }
}

#[async_trait]
impl TenantRegistry for MemoryRegistry {
    async fn find_tenant(&self, tenant_id: &str) -> DbResult<Option<TenantRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(tenant_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_registry_finds_inserted_records() {
        let registry = MemoryRegistry::with_records([TenantRecord::new("store-1", "db1")]);

        let found = registry.find_tenant("store-1").await.unwrap();
        assert_eq!(found.map(|r| r.schema_name), Some("db1".to_string()));
        assert!(registry.find_tenant("store-2").await.unwrap().is_none());

        registry.remove("store-1");
        assert!(registry.find_tenant("store-1").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn pg_registry_reads_stores_table() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = PgPool::connect(&url).await.expect("pool creation failed");

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS public.stores (
                id TEXT PRIMARY KEY,
                schema_name TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_deleted BOOLEAN NOT NULL DEFAULT FALSE
            )",
        )
        .execute(&pool)
        .await
        .expect("create stores failed");
        sqlx::query(
            "INSERT INTO public.stores (id, schema_name) VALUES ('tenantctl-test', 'tenantctl_test')
             ON CONFLICT (id) DO NOTHING",
        )
        .execute(&pool)
        .await
        .expect("insert failed");

        let registry = PgTenantRegistry::new(pool, "public");
        let record = registry
            .find_tenant("tenantctl-test")
            .await
            .expect("lookup failed")
            .expect("record missing");
        assert_eq!(record.schema_name, "tenantctl_test");
        assert!(registry.find_tenant("missing").await.unwrap().is_none());
    }
}
