// kiln/src/cli/check.rs

use clap::Args;
use colored::Colorize;
use kiln_common::config::Config;
use kiln_common::error::Result;

use crate::cli::{load_formula, locate_formula};

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Formula descriptors to validate
    #[arg(required = true)]
    formulae: Vec<String>,
}

impl CheckArgs {
    /// Validates every descriptor, reporting each one, and fails if any is invalid.
    pub async fn run(&self, config: &Config) -> Result<()> {
        let mut first_error = None;
        for spec in &self.formulae {
            let shown = locate_formula(spec, config)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| spec.clone());
            match load_formula(spec, config) {
                Ok(formula) => println!(
                    "{} {}: {} {}",
                    "✓".green(),
                    shown,
                    formula.name().cyan(),
                    formula.version_str_full()
                ),
                Err(e) => {
                    println!("{} {}: {}", "✗".red().bold(), shown, e.to_string().red());
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
