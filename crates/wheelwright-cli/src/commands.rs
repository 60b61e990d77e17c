//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow
    Run {
        /// Path to workflow file
        #[arg(default_value = "wheelwright.yaml")]
        path: String,

        /// Maximum concurrent jobs
        #[arg(short = 'j', long)]
        max_parallel: Option<usize>,

        /// Directory jobs run in
        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Skip the release phase
        #[arg(long)]
        no_release: bool,

        /// Cache store directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow file
        #[arg(default_value = "wheelwright.yaml")]
        path: String,
    },

    /// Show the jobs a workflow expands to
    Expand {
        /// Path to workflow file
        #[arg(default_value = "wheelwright.yaml")]
        path: String,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the workflow file JSON schema
    Schema,

    /// Manage the build cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cache entries
    List,

    /// Clear cache entries
    Clear {
        /// Cache key prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
