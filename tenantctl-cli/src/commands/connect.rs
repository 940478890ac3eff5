//! Connection commands
//!
//! Commands: connect, watch

use anyhow::{bail, Context, Result};
use clap::Parser;
use tenantctl_core::{ConnectionHandle, PgTenantManager};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
pub struct ConnectArgs {
    /// Tenant (store) ids to connect
    #[arg(required = true, value_name = "TENANT")]
    pub tenants: Vec<String>,

    /// Print statistics as a single JSON line
    #[arg(long)]
    pub compact: bool,
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Tenant (store) ids to connect before watching
    #[arg(value_name = "TENANT")]
    pub tenants: Vec<String>,
}

/// Connect every tenant, logging failures; returns how many failed.
async fn connect_all(manager: &PgTenantManager, tenants: &[String]) -> usize {
    let mut failed = 0;
    for tenant in tenants {
        match manager.get_connection(tenant).await {
            Ok(conn) => info!(tenant = %tenant, schema = %conn.schema_name(), "connected"),
            Err(e) if e.is_tenant_error() => {
                warn!(tenant = %tenant, error = %e, "tenant cannot be connected");
                failed += 1;
            }
            Err(e) => {
                error!(tenant = %tenant, error = %e, "connection failed");
                failed += 1;
            }
        }
    }
    failed
}

pub async fn run_connect(args: ConnectArgs, database_url: Option<&str>) -> Result<()> {
    let manager = super::build_manager(database_url).await?;

    let failed = connect_all(&manager, &args.tenants).await;

    let stats = manager.connection_stats();
    let rendered = if args.compact {
        serde_json::to_string(&stats)
    } else {
        serde_json::to_string_pretty(&stats)
    }
    .context("failed to serialize connection stats")?;
    println!("{rendered}");

    manager.shutdown().await;

    if failed > 0 {
        bail!("{} of {} tenant(s) failed to connect", failed, args.tenants.len());
    }
    Ok(())
}

pub async fn run_watch(args: WatchArgs, database_url: Option<&str>) -> Result<()> {
    let manager = super::build_manager(database_url).await?;
    manager.spawn_maintenance();

    connect_all(&manager, &args.tenants).await;

    let period = manager.config().cleanup_interval;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(cleanup_interval = ?period, "watching tenant connections (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let stats = manager.connection_stats();
                info!(
                    total = stats.total_connections,
                    initializing = stats.initializing_connections,
                    schemas = ?stats
                        .connection_details
                        .iter()
                        .map(|d| d.schema_name.as_str())
                        .collect::<Vec<_>>(),
                    "connection cache"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("interrupt received");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
