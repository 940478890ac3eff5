//! In-memory backend for manager tests.
//!
//! `MockDb` stands in for one Postgres server: the admin catalog and every
//! tenant handle share it, and it records schema creates and index drops.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tenantctl_core::{
    Catalog, ConnectionHandle, Connector, DataModel, DbError, DbResult, ManagerConfig,
    MemoryRegistry, SchemaIndex, TenantConnectionManager, TenantRecord,
};

pub type TestManager = TenantConnectionManager<MemoryRegistry, MockConnector>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropRecord {
    /// "admin" or the schema of the tenant handle used
    pub via: String,
    pub schema: String,
    pub index: String,
}

#[derive(Debug, Default)]
pub struct MockDb {
    pub schemas: HashSet<String>,
    pub indexes: HashMap<String, Vec<SchemaIndex>>,
    pub index_queries: usize,
    pub schema_creates: usize,
    pub drops: Vec<DropRecord>,
    pub fail_schema_check: bool,
    pub fail_index_query: bool,
    pub fail_drop: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct MockCatalog {
    via: String,
    db: Arc<Mutex<MockDb>>,
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn schema_exists(&self, schema: &str) -> DbResult<bool> {
        let db = self.db.lock().unwrap();
        if db.fail_schema_check {
            return Err(DbError::Backend("permission denied".into()));
        }
        Ok(db.schemas.contains(schema))
    }

    async fn create_schema(&self, schema: &str) -> DbResult<()> {
        let mut db = self.db.lock().unwrap();
        if db.schemas.insert(schema.to_string()) {
            db.schema_creates += 1;
        }
        Ok(())
    }

    async fn list_indexes(&self, schema: &str) -> DbResult<Vec<SchemaIndex>> {
        let mut db = self.db.lock().unwrap();
        db.index_queries += 1;
        if db.fail_index_query {
            return Err(DbError::Backend("index query failed".into()));
        }
        Ok(db.indexes.get(schema).cloned().unwrap_or_default())
    }

    async fn drop_index(&self, schema: &str, index: &str) -> DbResult<()> {
        let mut db = self.db.lock().unwrap();
        if db.fail_drop.contains(index) {
            return Err(DbError::Backend(format!("cannot drop {index}")));
        }
        if let Some(present) = db.indexes.get_mut(schema) {
            present.retain(|existing| existing.name != index);
        }
        db.drops.push(DropRecord {
            via: self.via.clone(),
            schema: schema.to_string(),
            index: index.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConnectorState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub next_id: AtomicU64,
    pub connect_delay_ms: AtomicU64,
    pub fail_close: AtomicBool,
    pub failing: Mutex<HashSet<String>>,
}

impl ConnectorState {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_schema(&self, schema: &str) {
        self.failing.lock().unwrap().insert(schema.to_string());
    }

    pub fn heal_schema(&self, schema: &str) {
        self.failing.lock().unwrap().remove(schema);
    }
}

#[derive(Debug, Clone)]
pub struct MockHandle {
    pub id: u64,
    schema: String,
    catalog: MockCatalog,
    closed: Arc<AtomicUsize>,
    state: Arc<ConnectorState>,
}

impl MockHandle {
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Catalog for MockHandle {
    async fn schema_exists(&self, schema: &str) -> DbResult<bool> {
        self.catalog.schema_exists(schema).await
    }

    async fn create_schema(&self, schema: &str) -> DbResult<()> {
        self.catalog.create_schema(schema).await
    }

    async fn list_indexes(&self, schema: &str) -> DbResult<Vec<SchemaIndex>> {
        self.catalog.list_indexes(schema).await
    }

    async fn drop_index(&self, schema: &str, index: &str) -> DbResult<()> {
        self.catalog.drop_index(schema, index).await
    }
}

#[async_trait]
impl ConnectionHandle for MockHandle {
    fn schema_name(&self) -> &str {
        &self.schema
    }

    async fn close(&self) -> DbResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::Backend("socket already gone".into()));
        }
        Ok(())
    }
}

pub struct MockConnector {
    admin: MockCatalog,
    db: Arc<Mutex<MockDb>>,
    pub state: Arc<ConnectorState>,
}

impl MockConnector {
    pub fn new() -> Self {
        let db = Arc::new(Mutex::new(MockDb::default()));
        Self {
            admin: MockCatalog {
                via: "admin".into(),
                db: Arc::clone(&db),
            },
            db,
            state: Arc::new(ConnectorState::default()),
        }
    }

    pub fn db(&self) -> Arc<Mutex<MockDb>> {
        Arc::clone(&self.db)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Handle = MockHandle;
    type Admin = MockCatalog;

    async fn connect(&self, schema: &str) -> DbResult<MockHandle> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.state.failing.lock().unwrap().contains(schema) {
            return Err(DbError::Backend("connection refused".into()));
        }

        Ok(MockHandle {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            schema: schema.to_string(),
            catalog: MockCatalog {
                via: schema.to_string(),
                db: Arc::clone(&self.db),
            },
            closed: Arc::new(AtomicUsize::new(0)),
            state: Arc::clone(&self.state),
        })
    }

    fn admin(&self) -> &MockCatalog {
        &self.admin
    }
}

/// Tenants `store-a` → `db1`, `store-b` → `db2`, `store-c` → `db3`, plus a
/// record with a blank schema.
pub fn registry() -> MemoryRegistry {
    MemoryRegistry::with_records([
        TenantRecord::new("store-a", "db1"),
        TenantRecord::new("store-b", "db2"),
        TenantRecord::new("store-c", "db3"),
        TenantRecord::new("store-blank", "   "),
    ])
}

pub fn config(max_cached_connections: usize) -> ManagerConfig {
    ManagerConfig {
        max_cached_connections,
        idle_timeout: Duration::from_secs(60),
        cleanup_interval: Duration::from_secs(10),
    }
}

pub struct Harness {
    pub manager: TestManager,
    pub state: Arc<ConnectorState>,
    pub db: Arc<Mutex<MockDb>>,
}

pub fn harness_with(
    registry: MemoryRegistry,
    model: DataModel,
    config: ManagerConfig,
) -> Harness {
    let connector = MockConnector::new();
    let state = Arc::clone(&connector.state);
    let db = connector.db();
    let manager = TenantConnectionManager::new(registry, connector, model, config)
        .expect("valid config");
    Harness { manager, state, db }
}

/// Table managed by the default test model.
pub const MANAGED_TABLE: &str = "orders";

pub fn harness(config: ManagerConfig) -> Harness {
    harness_with(registry(), DataModel::new().with_tables([MANAGED_TABLE]), config)
}

impl Harness {
    /// Create `schema` holding `names` as indexes on `table`.
    pub fn seed_table_indexes(&self, schema: &str, table: &str, names: &[&str]) {
        let mut db = self.db.lock().unwrap();
        db.schemas.insert(schema.to_string());
        db.indexes
            .entry(schema.to_string())
            .or_default()
            .extend(names.iter().map(|name| SchemaIndex::new(table, *name)));
    }

    /// Create `schema` holding `names` as indexes on the managed table.
    pub fn seed_indexes(&self, schema: &str, names: &[&str]) {
        self.seed_table_indexes(schema, MANAGED_TABLE, names);
    }

    pub fn index_names(&self, schema: &str) -> Vec<String> {
        self.db.lock().unwrap().indexes[schema]
            .iter()
            .map(|index| index.name.clone())
            .collect()
    }
}
