//! Wheelwright CLI entrypoint.

use clap::Parser;

mod commands;
mod config;
mod executor;
mod handlers;


use commands::{CacheCommands, Commands, ConfigCommands};
use config::CliConfig;
use executor::RunOptions;

#[derive(Parser)]
#[command(name = "wheelwright")]
#[command(author, version, about = "Wheelwright command-line interface", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = CliConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Run {
            path,
            max_parallel,
            workspace,
            no_release,
            cache_dir,
        } => {
            let options = RunOptions {
                workspace,
                max_parallel: max_parallel.or(config.max_parallel),
                no_release,
                cache_dir: cache_dir.unwrap_or_else(|| config.cache_root()),
            };
            let code = handlers::run(&config, &path, options).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Validate { path } => handlers::validate(&path).await?,
        Commands::Expand { path, json } => handlers::expand(&path, json).await?,
        Commands::Schema => handlers::schema()?,
        Commands::Cache { command } => match command {
            CacheCommands::List => handlers::list_cache(&config).await?,
            CacheCommands::Clear { prefix } => handlers::clear_cache(&config, prefix).await?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
