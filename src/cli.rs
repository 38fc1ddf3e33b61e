//! CLI command definitions using clap.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use regop_finalizer::FinalizerConfig;

/// regop - image registry operator
#[derive(Parser, Debug)]
#[command(name = "regop")]
#[command(version)]
#[command(about = "Finalizes image registry resources before the store deletes them")]
pub struct Cli {
    /// Finalizer configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load the configuration named by `--config`, or the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_config(&self) -> Result<FinalizerConfig> {
        let Some(path) = self.config.as_deref() else {
            return Ok(FinalizerConfig::default());
        };
        let config = FinalizerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        info!(path = %path.display(), "Loaded finalizer configuration");
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Delete a registry in an in-memory store and run the finalizer on it
    Simulate {
        /// Registry name
        #[arg(short, long, default_value = "cluster")]
        name: String,

        /// Registry namespace (empty for cluster-scoped)
        #[arg(long, default_value = "")]
        namespace: String,

        /// Number of dependent resources owned by the registry
        #[arg(short, long, default_value_t = 3)]
        dependents: usize,

        /// Finalizers held by other controllers
        #[arg(short, long)]
        extra_finalizer: Vec<String>,

        /// Seconds before other controllers release their finalizers
        #[arg(long, default_value_t = 5)]
        release_after_secs: u64,

        /// Make dependent removal fail
        #[arg(long, default_value_t = false)]
        fail_removal: bool,
    },

    /// Print the effective configuration
    Config,
}
