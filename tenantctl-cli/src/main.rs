//! tenantctl - per-tenant schema connection management
//!
//! Operational front end for `tenantctl-core`:
//! - Open tenant connections and inspect the cache (`connect`, `watch`)
//! - Provision tenant schemas (`provision`)
//! - Drop indexes the data model no longer declares (`sync-indexes`)
//! - Inspect configuration (`config`)

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod commands;
mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "tenantctl",
    author,
    version,
    about = "Per-tenant Postgres schema connection manager",
    long_about = "Resolve tenants to their schemas, open and cache one connection per schema, \
                  provision missing schemas and drop obsolete indexes."
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces over OTLP (requires the telemetry feature)
    #[arg(long, global = true)]
    otel: bool,

    /// Administrative database URL
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open connections for tenants and print cache statistics
    Connect(commands::connect::ConnectArgs),
    /// Keep tenant connections open and log cache statistics until Ctrl-C
    Watch(commands::connect::WatchArgs),
    /// Create a tenant schema if missing and drop its obsolete indexes
    Provision(commands::schema::ProvisionArgs),
    /// Drop indexes the data model no longer declares
    SyncIndexes(commands::schema::SyncIndexesArgs),
    /// Show effective configuration and config file locations
    Config(commands::config::ConfigArgs),
    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    shell: Shell,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)] // PowerShell is a proper noun, not a suffix
enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_setup::init(&tracing_setup::TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
    })
    .ok();
    tenantctl_core::config::load_dotenv()?;

    let database_url = cli.database_url.as_deref();
    let result = match cli.command {
        Commands::Connect(args) => commands::run_connect(args, database_url).await,
        Commands::Watch(args) => commands::run_watch(args, database_url).await,
        Commands::Provision(args) => commands::run_provision(args, database_url).await,
        Commands::SyncIndexes(args) => commands::run_sync_indexes(args, database_url).await,
        Commands::Config(args) => commands::run_config(args),
        Commands::Completions(args) => run_completions(args),
    };

    tracing_setup::shutdown_otel();
    result
}

fn run_completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::{generate, Shell as CompletionShell};
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    let shell = match args.shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    };

    generate(shell, &mut cmd, bin_name, &mut io::stdout());

    Ok(())
}
