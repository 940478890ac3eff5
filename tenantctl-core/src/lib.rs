//! tenantctl-core: per-tenant schema connection management
//!
//! Each tenant (store) owns a Postgres schema. [`TenantConnectionManager`]
//! hands out one cached connection per schema, connecting lazily,
//! deduplicating concurrent initialization, evicting by capacity and idle
//! time, provisioning missing schemas and dropping indexes the data model
//! no longer declares.

pub mod catalog;
pub mod config;
pub mod error;
pub mod indexes;
pub mod manager;
pub mod model;
pub mod postgres;
pub mod provision;
pub mod registry;
pub mod repository;
pub mod sql;

pub use catalog::{Catalog, ConnectionHandle, Connector, SchemaIndex};
pub use config::{ManagerConfig, TenantctlConfig};
pub use error::{ConfigError, DbError, DbResult, ManagerError, Result};
pub use indexes::IndexSynchronizer;
pub use manager::{ConnectionDetail, ConnectionStats, TenantConnectionManager};
pub use model::{DataModel, Entity};
pub use postgres::{PgAdmin, PgConnector, PgTenantConnection};
pub use provision::ensure_schema_exists;
pub use registry::{MemoryRegistry, PgTenantRegistry, TenantRecord, TenantRegistry};
pub use repository::Repository;

/// Manager wired to the Postgres backend.
pub type PgTenantManager = TenantConnectionManager<PgTenantRegistry, PgConnector>;
