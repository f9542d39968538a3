// kiln-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{KilnError, Result};

// This constant will serve as a fallback if KILN_ROOT is not set or is empty.
const DEFAULT_FALLBACK_KILN_ROOT: &str = "/opt/kiln";

#[derive(Debug, Clone)]
pub struct Config {
    pub kiln_root: PathBuf, // Public for direct construction in tests and the CLI
    pub fixtures_dir: Option<PathBuf>,
    pub make_jobs: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading kiln configuration");

        let kiln_root_str = env::var("KILN_ROOT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                debug!(
                    "KILN_ROOT environment variable not set or empty, falling back to default: {}",
                    DEFAULT_FALLBACK_KILN_ROOT
                );
                DEFAULT_FALLBACK_KILN_ROOT.to_string()
            });
        let kiln_root = PathBuf::from(&kiln_root_str);
        debug!("Effective KILN_ROOT set to: {}", kiln_root.display());

        let fixtures_dir = env::var("KILN_FIXTURES")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let make_jobs = match env::var("KILN_MAKE_JOBS") {
            Ok(raw) if !raw.is_empty() => parse_jobs(&raw)?,
            _ => num_cpus::get(),
        };

        debug!("Configuration loaded successfully.");
        Ok(Self {
            kiln_root,
            fixtures_dir,
            make_jobs,
        })
    }

    /// A configuration rooted at `root`, ignoring the environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            kiln_root: root.into(),
            fixtures_dir: None,
            make_jobs: num_cpus::get(),
        }
    }

    pub fn kiln_root(&self) -> &Path {
        &self.kiln_root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.kiln_root.join("bin")
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.kiln_root.join("Cellar")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.kiln_root.join("opt")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.kiln_root.join("kiln_build")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.kiln_root.join("kiln_logs")
    }

    /// Where bare formula names are looked up: `<root>/share/kiln/formulae/<name>.toml`.
    pub fn formulae_dir(&self) -> PathBuf {
        self.kiln_root.join("share").join("kiln").join("formulae")
    }

    pub fn fixtures_dir(&self) -> PathBuf {
        self.fixtures_dir
            .clone()
            .unwrap_or_else(|| self.kiln_root.join("share").join("kiln").join("fixtures"))
    }

    pub fn formula_cellar_dir(&self, formula_name: &str) -> PathBuf {
        self.cellar_dir().join(formula_name)
    }

    pub fn formula_keg_path(&self, formula_name: &str, version_str: &str) -> PathBuf {
        self.formula_cellar_dir(formula_name).join(version_str)
    }

    pub fn formula_opt_path(&self, formula_name: &str) -> PathBuf {
        self.opt_dir().join(formula_name)
    }
}

fn parse_jobs(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(KilnError::Config(format!(
            "KILN_MAKE_JOBS must be a positive integer, got '{raw}'"
        ))),
    }
}

pub fn load_config() -> Result<Config> {
    Config::load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_hang_off_the_root() {
        let config = Config::with_root("/tmp/kiln-root");
        assert_eq!(
            config.formula_keg_path("openimageio", "2.1.17"),
            PathBuf::from("/tmp/kiln-root/Cellar/openimageio/2.1.17")
        );
        assert_eq!(
            config.formula_opt_path("openimageio"),
            PathBuf::from("/tmp/kiln-root/opt/openimageio")
        );
        assert_eq!(
            config.fixtures_dir(),
            PathBuf::from("/tmp/kiln-root/share/kiln/fixtures")
        );
    }

    #[test]
    fn explicit_fixtures_dir_wins() {
        let mut config = Config::with_root("/tmp/kiln-root");
        config.fixtures_dir = Some(PathBuf::from("/srv/fixtures"));
        assert_eq!(config.fixtures_dir(), PathBuf::from("/srv/fixtures"));
    }

    #[test]
    fn jobs_must_be_positive() {
        assert_eq!(parse_jobs("4").unwrap(), 4);
        assert!(parse_jobs("0").is_err());
        assert!(parse_jobs("many").is_err());
    }
}
