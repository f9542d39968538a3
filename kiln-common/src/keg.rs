// kiln-common/src/keg.rs
use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::config::Config;
use super::error::Result;
use super::model::formula::parse_semver_like;

/// Written into a keg once its install run reaches `Installed`. A version directory
/// without it is a leftover of a failed run.
pub const RECEIPT_FILE_NAME: &str = "INSTALL_RECEIPT.json";

/// Represents information about an installed package (Keg).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledKeg {
    pub name: String,
    pub version_str: String,
    pub path: PathBuf,
}

/// Manages querying installed packages in the Cellar.
#[derive(Debug, Clone)]
pub struct KegRegistry {
    config: Config,
}

impl KegRegistry {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn formula_cellar_path(&self, name: &str) -> PathBuf {
        self.config.formula_cellar_dir(name)
    }

    pub fn get_opt_path(&self, name: &str) -> PathBuf {
        self.config.formula_opt_path(name)
    }

    /// Returns the newest installed keg of `name`, if any.
    pub fn get_installed_keg(&self, name: &str) -> Result<Option<InstalledKeg>> {
        let formula_dir = self.formula_cellar_path(name);
        debug!(
            "[KEG_REGISTRY:{}] Checking {}",
            name,
            formula_dir.display()
        );

        if !formula_dir.is_dir() {
            debug!("[KEG_REGISTRY:{}] No cellar directory. Returning None.", name);
            return Ok(None);
        }

        let mut latest_keg: Option<InstalledKeg> = None;
        for entry_result in fs::read_dir(&formula_dir)? {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        "[KEG_REGISTRY:{}] Error reading an entry in '{}': {}. Skipping entry.",
                        name,
                        formula_dir.display(),
                        e
                    );
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(version_str) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.join(RECEIPT_FILE_NAME).is_file() {
                debug!(
                    "[KEG_REGISTRY:{}] Skipping {} (no {}, install never completed)",
                    name,
                    path.display(),
                    RECEIPT_FILE_NAME
                );
                continue;
            }

            let candidate = InstalledKeg {
                name: name.to_string(),
                version_str: version_str.to_string(),
                path: path.clone(),
            };
            let newer = match &latest_keg {
                Some(current) => {
                    compare_keg_versions(&candidate.version_str, &current.version_str)
                        == Ordering::Greater
                }
                None => true,
            };
            if newer {
                latest_keg = Some(candidate);
            }
        }

        match &latest_keg {
            Some(keg) => debug!(
                "[KEG_REGISTRY:{}] Latest keg: {} ({})",
                name,
                keg.version_str,
                keg.path.display()
            ),
            None => debug!("[KEG_REGISTRY:{}] No keg versions found.", name),
        }
        Ok(latest_keg)
    }

    pub fn cellar_path(&self) -> PathBuf {
        self.config.cellar_dir()
    }
}

/// Orders keg directory names (`<version>` or `<version>_<revision>`), falling back to
/// a plain string comparison for names that are not version-like.
fn compare_keg_versions(a: &str, b: &str) -> Ordering {
    fn split(s: &str) -> (&str, u32) {
        match s.rsplit_once('_') {
            Some((version, revision)) => match revision.parse() {
                Ok(rev) => (version, rev),
                Err(_) => (s, 0),
            },
            None => (s, 0),
        }
    }
    let (a_version, a_rev) = split(a);
    let (b_version, b_rev) = split(b);
    match (parse_semver_like(a_version), parse_semver_like(b_version)) {
        (Some(av), Some(bv)) => av.cmp(&bv).then(a_rev.cmp(&b_rev)),
        _ => a.cmp(b),
    }
}
