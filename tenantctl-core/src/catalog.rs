//! Backend seams of the connection manager.
//!
//! The manager never talks to Postgres directly. It drives three traits:
//!
//! - [`Catalog`]: schema and index primitives, implemented both by the
//!   administrative connection and by tenant connections
//! - [`ConnectionHandle`]: an initialized session bound to one schema
//! - [`Connector`]: opens handles and exposes the administrative catalog
//!
//! [`crate::postgres`] implements them with sqlx; tests use in-memory mocks.

use async_trait::async_trait;

use crate::error::DbResult;

/// An index found in a tenant schema, with the table it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIndex {
    pub table: String,
    pub name: String,
}

impl SchemaIndex {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
        }
    }
}

/// Schema and index primitives executed over some connection.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn schema_exists(&self, schema: &str) -> DbResult<bool>;

    /// `CREATE SCHEMA IF NOT EXISTS`
    async fn create_schema(&self, schema: &str) -> DbResult<()>;

    /// Droppable indexes physically present in `schema`.
    ///
    /// Indexes backing primary-key or unique constraints are excluded.
    async fn list_indexes(&self, schema: &str) -> DbResult<Vec<SchemaIndex>>;

    async fn drop_index(&self, schema: &str, index: &str) -> DbResult<()>;
}

/// A ready-to-query session bound to one tenant schema.
///
/// Clones share the same underlying session; closing one closes all.
#[async_trait]
pub trait ConnectionHandle: Catalog + Clone + Send + Sync + 'static {
    fn schema_name(&self) -> &str;

    async fn close(&self) -> DbResult<()>;
}

/// Opens tenant connections and owns the administrative connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: ConnectionHandle;
    type Admin: Catalog;

    /// Establish and initialize a connection for `schema`.
    ///
    /// Implementations close any partially constructed session before
    /// returning an error.
    async fn connect(&self, schema: &str) -> DbResult<Self::Handle>;

    /// The shared administrative connection.
    fn admin(&self) -> &Self::Admin;
}
