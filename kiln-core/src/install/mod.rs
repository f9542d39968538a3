// kiln-core/src/install/mod.rs
// Finishing an installed keg: the receipt and the opt link.

use std::path::{Path, PathBuf};

use kiln_common::config::Config;
use kiln_common::error::Result;
use kiln_common::model::formula::Formula;
use tracing::debug;

pub mod receipt;

pub use receipt::{read_receipt, write_receipt, InstallReceipt};

/// Points `<root>/opt/<name>` at `keg_path`.
pub fn link_opt(config: &Config, formula: &Formula, keg_path: &Path) -> Result<PathBuf> {
    let opt_path = config.formula_opt_path(formula.name());
    debug!("Linking {} -> {}", opt_path.display(), keg_path.display());
    kiln_aio::fs::replace_symlink(keg_path, &opt_path)?;
    Ok(opt_path)
}
