// kiln-core/src/install/receipt.rs
use std::path::Path;

use kiln_common::dependency::ResolvedDependency;
use kiln_common::error::Result;
use kiln_common::model::formula::Formula;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use kiln_common::keg::RECEIPT_FILE_NAME;

/// What went into a keg, written next to its files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub source_url: String,
    pub configure_args: Vec<String>,
    pub dependencies: Vec<String>,
    pub verified: bool,
    pub time: String,
    pub built_on: BuiltOn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltOn {
    pub os: String,
    pub arch: String,
}

impl InstallReceipt {
    pub fn new(
        formula: &Formula,
        configure_args: &[String],
        deps: &[ResolvedDependency],
        verified: bool,
    ) -> Self {
        Self {
            name: formula.name().to_string(),
            version: formula.version_str_full(),
            source_url: formula.source_url().to_string(),
            configure_args: configure_args.to_vec(),
            dependencies: deps.iter().map(|d| d.name.clone()).collect(),
            verified,
            time: chrono::Utc::now().to_rfc3339(),
            built_on: BuiltOn {
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            },
        }
    }
}

/// Writes `INSTALL_RECEIPT.json` into `keg_path`.
pub fn write_receipt(receipt: &InstallReceipt, keg_path: &Path) -> Result<()> {
    let path = keg_path.join(RECEIPT_FILE_NAME);
    debug!("Writing receipt {}", path.display());
    kiln_aio::json_io::write_json_sync(&path, receipt)
}

pub fn read_receipt(keg_path: &Path) -> Result<InstallReceipt> {
    kiln_aio::json_io::read_json_sync(&keg_path.join(RECEIPT_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use kiln_common::dependency::DependencyTag;

    use super::*;
    use crate::test_support::oiio_descriptor;

    #[test]
    fn receipt_records_build_inputs() {
        let keg = tempfile::tempdir().unwrap();
        let formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        let deps = vec![ResolvedDependency {
            name: "boost".into(),
            tags: DependencyTag::RUNTIME,
            prefix: PathBuf::from("/opt/kiln/opt/boost"),
        }];
        let args = vec!["-DUSE_QT=OFF".to_string()];
        write_receipt(&InstallReceipt::new(&formula, &args, &deps, true), keg.path()).unwrap();

        let back = read_receipt(keg.path()).unwrap();
        assert_eq!(back.name, "openimageio");
        assert_eq!(back.version, "2.1.17");
        assert_eq!(back.dependencies, ["boost"]);
        assert_eq!(back.configure_args, args);
        assert!(chrono::DateTime::parse_from_rfc3339(&back.time).is_ok());
    }
}
