//! # regop
//!
//! Runs the registry finalizer against an in-memory store.
//!
//! Ctrl+C cancels an in-flight pass through the cancellation token; the
//! finalizer then stops at its next wait and reports the cancellation.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use regop::cli::{Cli, Commands};
use regop::simulate::{self, SimulationPlan};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    match cli.command {
        Commands::Simulate {
            name,
            namespace,
            dependents,
            extra_finalizer,
            release_after_secs,
            fail_removal,
        } => {
            let plan = SimulationPlan {
                name,
                namespace,
                dependents,
                extra_finalizers: extra_finalizer,
                release_after: Duration::from_secs(release_after_secs),
                fail_removal,
            };
            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());

            let report = simulate::run(&plan, config, &cancel)
                .await
                .context("Simulation failed")?;
            let rendered = serde_json::to_string_pretty(&report.to_json())
                .context("Failed to render report")?;
            println!("{rendered}");

            if let Err(e) = &report.outcome {
                anyhow::bail!("Finalization did not complete: {e}");
            }
        }
        Commands::Config => {
            let rendered = config
                .to_toml_string()
                .context("Failed to render configuration")?;
            print!("{rendered}");
        }
    }

    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, cancelling");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });
}
