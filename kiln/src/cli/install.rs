// kiln/src/cli/install.rs

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use kiln_aio::process::SystemRunner;
use kiln_common::config::Config;
use kiln_common::dependency::KegResolver;
use kiln_common::error::{KilnError, Result};
use kiln_common::keg::KegRegistry;
use kiln_common::model::build::parse_override;
use kiln_common::model::Overrides;
use kiln_common::pipeline::InstallReport;
use kiln_core::{InstallOptions, InstallPipeline};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::cli::{load_formula, status};

const EVENT_CHANNEL_SIZE: usize = 256;
const FAILURE_TAIL_LINES: usize = 40;

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Formula descriptor path, or a name looked up in the formulae directory
    formula: String,

    /// Unpacked source tree or .tar/.tar.gz/.tgz archive to build from
    #[arg(long, value_name = "PATH")]
    source: PathBuf,

    /// Override an overridable build flag
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,

    /// Disable an overridable build flag
    #[arg(long = "unset", value_name = "NAME")]
    unset: Vec<String>,

    #[arg(long, help = "Install without running the formula's checks")]
    skip_verify: bool,

    /// Directory holding check fixtures (default: $KILN_FIXTURES or <root>/share/kiln/fixtures)
    #[arg(long, value_name = "DIR")]
    fixtures: Option<PathBuf>,

    /// Parallel make jobs (default: $KILN_MAKE_JOBS or the CPU count)
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    jobs: Option<u16>,
}

impl InstallArgs {
    fn overrides(&self) -> Result<Overrides> {
        let mut overrides = Overrides::new();
        for spec in &self.set {
            match parse_override(spec)? {
                (name, Some(value)) => {
                    overrides.insert(name, Some(value));
                }
                (name, None) => {
                    return Err(KilnError::InvalidOverride(
                        name,
                        "--set expects NAME=VALUE (use --unset to disable a flag)".to_string(),
                    ))
                }
            }
        }
        for spec in &self.unset {
            match parse_override(spec)? {
                (name, None) => {
                    overrides.insert(name, None);
                }
                (name, Some(_)) => {
                    return Err(KilnError::InvalidOverride(
                        name,
                        "--unset takes a bare flag name".to_string(),
                    ))
                }
            }
        }
        Ok(overrides)
    }

    #[instrument(skip(self, config), fields(formula = %self.formula))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let formula = load_formula(&self.formula, config)?;
        let options = InstallOptions {
            source: self.source.clone(),
            overrides: self.overrides()?,
            skip_verify: self.skip_verify,
            fixtures_dir: self.fixtures.clone(),
            jobs: self.jobs.map(usize::from),
        };

        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let status_handle = tokio::spawn(status::handle_events(event_rx));

        let pipeline_config = config.clone();
        let report = tokio::task::spawn_blocking(move || {
            let resolver = KegResolver::new(KegRegistry::new(pipeline_config.clone()));
            InstallPipeline::new(&pipeline_config, &SystemRunner, &resolver)
                .with_events(event_tx)
                .install(&formula, &options)
        })
        .await
        .map_err(|e| KilnError::Generic(format!("install task panicked: {e}")))?;

        // The pipeline owned the last sender, so the status task drains and exits.
        if let Err(e) = status_handle.await {
            debug!("Status task ended abnormally: {}", e);
        }

        print_outcome(&report);
        match report.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn print_outcome(report: &InstallReport) {
    let Some(err) = &report.error else {
        println!(
            "{}{} {} {}",
            "==> ".bold().blue(),
            "Installed".green().bold(),
            format!("{} {}", report.name, report.version).cyan(),
            report.keg_path.display()
        );
        return;
    };

    if let KilnError::BuildPhase {
        captured_output, ..
    } = err
    {
        let lines: Vec<&str> = captured_output.lines().collect();
        let tail = &lines[lines.len().saturating_sub(FAILURE_TAIL_LINES)..];
        if !tail.is_empty() {
            eprintln!("{}", "Last lines of tool output:".bold());
            for line in tail {
                eprintln!("    {line}");
            }
        }
    }
    if let Some(workdir) = &report.workdir {
        eprintln!(
            "{} {}",
            "Build directory kept at".yellow(),
            workdir.display()
        );
    }
}
