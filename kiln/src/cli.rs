// kiln/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use kiln_common::error::{KilnError, Result};
use kiln_common::{Config, Formula};
use tracing::debug;

pub mod check;
pub mod info;
pub mod install;
pub mod status;
pub mod test;

use crate::cli::check::CheckArgs;
use crate::cli::info::Info;
use crate::cli::install::InstallArgs;
use crate::cli::test::TestArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "kiln", bin_name = "kiln")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a formula from source, install it into the cellar and verify it
    Install(InstallArgs),
    /// Re-run the checks of an installed formula
    Test(TestArgs),
    /// Show formula metadata
    Info(Info),
    /// Validate a formula descriptor without building anything
    Check(CheckArgs),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config).await,
            Self::Test(command) => command.run(config).await,
            Self::Info(command) => command.run(config).await,
            Self::Check(command) => command.run(config).await,
        }
    }
}

/// Resolves a formula argument: an existing descriptor path, or a bare name looked up
/// in the configured formulae directory.
pub fn locate_formula(spec: &str, config: &Config) -> Result<PathBuf> {
    let path = Path::new(spec);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    let is_bare_name = path.components().count() == 1 && path.extension().is_none();
    if is_bare_name {
        let dir = config.formulae_dir();
        for candidate in [dir.join(format!("{spec}.toml")), dir.join(format!("{spec}.json"))] {
            if candidate.is_file() {
                debug!("Resolved formula '{}' to {}", spec, candidate.display());
                return Ok(candidate);
            }
        }
    }
    Err(KilnError::NotFound(format!("formula '{spec}'")))
}

pub fn load_formula(spec: &str, config: &Config) -> Result<Formula> {
    Formula::from_path(&locate_formula(spec, config)?)
}
