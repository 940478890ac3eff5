//! Command implementations for tenantctl

pub mod config;
pub mod connect;
pub mod schema;

pub use config::run_config;
pub use connect::{run_connect, run_watch};
pub use schema::{run_provision, run_sync_indexes};

use anyhow::{Context, Result};
use tenantctl_core::{
    PgConnector, PgTenantManager, PgTenantRegistry, TenantConnectionManager, TenantctlConfig,
};
use tracing::{debug, warn};

/// Build a Postgres-backed manager from the layered config.
pub(crate) async fn build_manager(database_url: Option<&str>) -> Result<PgTenantManager> {
    build_manager_from(TenantctlConfig::load(), database_url).await
}

/// The registry shares the administrative pool with the connector.
pub(crate) async fn build_manager_from(
    config: TenantctlConfig,
    database_url: Option<&str>,
) -> Result<PgTenantManager> {
    let url = config.database_url(database_url)?;
    let limits = config
        .manager_config()
        .context("invalid connection manager limits")?;

    let connector = PgConnector::from_url(&url, config.database.max_connections_per_tenant)
        .await
        .context("failed to connect to the administrative database")?;
    let registry = PgTenantRegistry::new(
        connector.admin_pool().clone(),
        &config.database.registry_schema,
    );
    let model = config.data_model();
    if model.is_empty() {
        warn!("[model].tables is empty; obsolete index cleanup is disabled");
    }

    debug!(
        max_cached = limits.max_cached_connections,
        idle_timeout = ?limits.idle_timeout,
        managed_tables = model.tables().len(),
        declared_indexes = model.declared_indexes().len(),
        "building tenant connection manager"
    );

    TenantConnectionManager::new(registry, connector, model, limits)
        .context("invalid connection manager limits")
}
