// kiln/src/cli/test.rs

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use kiln_aio::process::SystemRunner;
use kiln_common::config::Config;
use kiln_common::dependency::KegResolver;
use kiln_common::error::{KilnError, Result};
use kiln_common::keg::KegRegistry;
use kiln_core::InstallPipeline;
use tokio::sync::broadcast;

use crate::cli::{load_formula, status};

#[derive(Debug, Args)]
pub struct TestArgs {
    /// Formula descriptor path, or a name looked up in the formulae directory
    formula: String,

    /// Directory holding check fixtures
    #[arg(long, value_name = "DIR")]
    fixtures: Option<PathBuf>,
}

impl TestArgs {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let formula = load_formula(&self.formula, config)?;
        let (event_tx, event_rx) = broadcast::channel(64);
        let status_handle = tokio::spawn(status::handle_events(event_rx));

        let pipeline_config = config.clone();
        let fixtures = self.fixtures.clone();
        let check_count = formula.checks.len();
        let name = formula.name().to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            let resolver = KegResolver::new(KegRegistry::new(pipeline_config.clone()));
            InstallPipeline::new(&pipeline_config, &SystemRunner, &resolver)
                .with_events(event_tx)
                .verify_installed(&formula, fixtures.as_ref())
        })
        .await
        .map_err(|e| KilnError::Generic(format!("test task panicked: {e}")))?;
        let _ = status_handle.await;

        outcome?;
        println!(
            "{}{} {} checks passed",
            "==> ".bold().blue(),
            name.cyan(),
            check_count
        );
        Ok(())
    }
}
