use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tenantctl_core::config::{
    global_config_path, local_config_path, ENV_CLEANUP_INTERVAL, ENV_CONNECTION_IDLE_TIMEOUT,
    ENV_MAX_CACHED_CONNECTIONS,
};
use tenantctl_core::TenantctlConfig;

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the merged file configuration and effective manager limits
    Show,
    /// Show config file locations
    Path,
}

pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show => run_show(),
        ConfigCommands::Path => run_path(),
    }
}

fn run_show() -> Result<()> {
    let config = TenantctlConfig::load();

    let mut rendered = config.clone();
    if rendered.database.url.is_some() {
        rendered.database.url = Some("<redacted>".to_string());
    }
    let toml = toml::to_string_pretty(&rendered).context("failed to render config")?;
    println!("{}", toml.trim_end());

    let limits = config
        .manager_config()
        .context("invalid connection manager limits")?;
    println!();
    println!("# effective limits (after {ENV_MAX_CACHED_CONNECTIONS}, {ENV_CONNECTION_IDLE_TIMEOUT}, {ENV_CLEANUP_INTERVAL})");
    println!("max_cached_connections = {}", limits.max_cached_connections);
    println!("idle_timeout_ms = {}", limits.idle_timeout.as_millis());
    println!("cleanup_interval_ms = {}", limits.cleanup_interval.as_millis());

    Ok(())
}

fn run_path() -> Result<()> {
    let describe = |exists: bool| if exists { "found" } else { "missing" };

    match global_config_path() {
        Some(path) => println!("global: {} ({})", path.display(), describe(path.exists())),
        None => println!("global: <no home directory>"),
    }
    let local = local_config_path();
    println!("local:  {} ({})", local.display(), describe(local.exists()));

    Ok(())
}
