//! Schema maintenance commands
//!
//! Commands: provision, sync-indexes

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tenantctl_core::{Connector, IndexSynchronizer, TenantctlConfig};

#[derive(Parser, Debug)]
pub struct ProvisionArgs {
    /// Schema to create if missing
    #[arg(value_name = "SCHEMA")]
    pub schema: String,
}

#[derive(Parser, Debug)]
pub struct SyncIndexesArgs {
    /// Schemas to clean up
    #[arg(required = true, value_name = "SCHEMA")]
    pub schemas: Vec<String>,

    /// List obsolete indexes without dropping them
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run_provision(args: ProvisionArgs, database_url: Option<&str>) -> Result<()> {
    let manager = super::build_manager(database_url).await?;

    let created = manager
        .ensure_schema_exists(&args.schema)
        .await
        .with_context(|| format!("failed to provision schema '{}'", args.schema))?;
    if created {
        println!("created schema {}", args.schema);
    } else {
        println!("schema {} already exists", args.schema);
    }

    let dropped = manager
        .drop_obsolete_indexes_with_global_connection(&args.schema)
        .await;
    for index in &dropped {
        println!("dropped index {}.{}", args.schema, index);
    }

    manager.shutdown().await;
    Ok(())
}

pub async fn run_sync_indexes(args: SyncIndexesArgs, database_url: Option<&str>) -> Result<()> {
    let config = TenantctlConfig::load();
    if config.data_model().is_empty() {
        bail!("no managed tables: list them under [model].tables before syncing indexes");
    }
    let manager = super::build_manager_from(config, database_url).await?;

    if args.dry_run {
        let sync = IndexSynchronizer::new(Arc::new(manager.model().clone()));
        for schema in &args.schemas {
            let obsolete = sync
                .obsolete_indexes(manager.connector().admin(), schema)
                .await
                .with_context(|| format!("failed to list indexes in '{schema}'"))?;
            for index in obsolete {
                println!("would drop {schema}.{index}");
            }
        }
    } else {
        for schema in &args.schemas {
            for index in manager.drop_obsolete_indexes(schema).await {
                println!("dropped index {schema}.{index}");
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
