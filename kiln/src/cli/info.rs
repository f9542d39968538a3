//! Contains the logic for the `info` command.

use clap::Args;
use colored::Colorize;
use kiln_common::config::Config;
use kiln_common::error::Result;
use kiln_common::model::Overrides;
use kiln_common::Formula;
use kiln_core::build::standard_args;

use crate::cli::load_formula;

#[derive(Args, Debug)]
pub struct Info {
    /// Formula descriptor path, or a name looked up in the formulae directory
    pub formula: String,

    /// Print the normalized descriptor as JSON
    #[arg(long, conflicts_with = "args")]
    pub json: bool,

    /// Print the configure arguments a default install would use, one per line
    #[arg(long)]
    pub args: bool,
}

impl Info {
    pub async fn run(&self, config: &Config) -> Result<()> {
        tracing::debug!("Getting info for formula: {}", self.formula);
        let formula = load_formula(&self.formula, config)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&formula)?);
            return Ok(());
        }

        let prefix = formula.install_prefix(&config.cellar_dir());
        if self.args {
            let base = standard_args(formula.build.system, &prefix);
            for arg in formula.build.configure_args(&base, &Overrides::new())? {
                println!("{arg}");
            }
            return Ok(());
        }

        print_formula_info(&formula, config);
        Ok(())
    }
}

fn print_formula_info(formula: &Formula, config: &Config) {
    println!(
        "{}",
        format!("Formula: {}", formula.name()).green().bold()
    );

    let homepage = formula
        .homepage
        .as_ref()
        .map_or_else(|| "N/A".to_string(), |u| u.to_string());
    let keg = formula.install_prefix(&config.cellar_dir());

    let mut table = prettytable::Table::new();
    table.set_format(*prettytable::format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.add_row(prettytable::row!["Version", formula.version_str_full()]);
    table.add_row(prettytable::row!["Homepage", homepage]);
    table.add_row(prettytable::row!["Source", formula.source_url()]);
    if let Some(head) = &formula.head {
        table.add_row(prettytable::row!["Head", head]);
    }
    table.add_row(prettytable::row!["Checksum", formula.checksum()]);
    table.add_row(prettytable::row!["Build system", formula.build.system]);
    table.add_row(prettytable::row!["Keg", keg.display()]);
    table.printstd();

    if let Some(desc) = formula.desc.as_deref().filter(|d| !d.is_empty()) {
        println!("\n{}", "Description".blue().bold());
        println!("  {desc}");
    }

    if !formula.dependencies.is_empty() {
        println!("\n{}", "Dependencies".blue().bold());
        for dep in &formula.dependencies {
            println!("  {} {}", dep.name, format!("({})", dep.tags).dimmed());
        }
    }

    if !formula.bottle.is_empty() {
        println!("\n{}", "Bottles".blue().bold());
        for (tag, digest) in &formula.bottle {
            println!("  {tag}: {}", digest.hex);
        }
    }

    if !formula.checks.is_empty() {
        println!("\n{}", "Checks".blue().bold());
        for (i, check) in formula.checks.iter().enumerate() {
            println!("  #{i} {check}");
        }
    }
}
