// kiln-common/src/model/formula.rs
// This module defines the Formula descriptor: identity, source, integrity digests,
// declared dependencies, build configuration and post-install checks.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;
use url::Url;

use super::build::BuildConfig;
use super::check::CheckSpec;
use crate::dependency::{Dependency, DependencyExt};
use crate::error::{KilnError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Number of hex digits a digest of this algorithm has.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha1 => 40,
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Sha1 => f.write_str("sha1"),
            ChecksumAlgorithm::Sha256 => f.write_str("sha256"),
            ChecksumAlgorithm::Sha512 => f.write_str("sha512"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            other => Err(KilnError::MalformedFormula(format!(
                "unsupported checksum algorithm '{other}'"
            ))),
        }
    }
}

/// An algorithm-tagged hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub hex: String,
}

impl Checksum {
    /// Validates `hex` against the expected length and alphabet of `algorithm`.
    pub fn new(algorithm: ChecksumAlgorithm, hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != algorithm.hex_len() {
            return Err(KilnError::MalformedFormula(format!(
                "{algorithm} checksum must be {} hex digits, got {}",
                algorithm.hex_len(),
                hex.len()
            )));
        }
        hex::decode(hex).map_err(|e| {
            KilnError::MalformedFormula(format!("{algorithm} checksum is not valid hex: {e}"))
        })?;
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Parses the tagged form `<algorithm>:<hex>`.
    pub fn parse_tagged(s: &str) -> Result<Self> {
        let (algorithm, hex) = s.split_once(':').ok_or_else(|| {
            KilnError::MalformedFormula(format!(
                "checksum '{s}' must be written as <algorithm>:<hex>"
            ))
        })?;
        Self::new(algorithm.parse()?, hex)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses `1`, `1.2`, `1.2.3`, optionally followed by a `-pre` or `+build` suffix,
/// padding missing components with zeros.
pub fn parse_semver_like(s: &str) -> Option<Version> {
    let s = s.trim();
    let split_at = s.find(['-', '+']).unwrap_or(s.len());
    let (core, suffix) = s.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty()
        || parts.len() > 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);
    Version::parse(&padded).ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct Formula {
    pub name: String,
    pub desc: Option<String>,
    pub homepage: Option<Url>,
    /// Source download URL (stable version).
    pub url: Url,
    pub head: Option<Url>,
    pub version: String,
    pub revision: u32,
    pub checksum: Checksum,
    /// Precomputed bottle digests keyed by platform identifier.
    pub bottle: BTreeMap<String, Checksum>,
    pub dependencies: Vec<Dependency>,
    pub build: BuildConfig,
    pub checks: Vec<CheckSpec>,
}

// Descriptor as authored; turned into a `Formula` only after validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFormula {
    name: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    url: String,
    #[serde(default)]
    head: Option<String>,
    version: String,
    #[serde(default)]
    revision: u32,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    bottle: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: Vec<Dependency>,
    #[serde(default)]
    build: BuildConfig,
    #[serde(default, rename = "test")]
    checks: Vec<CheckSpec>,
}

fn malformed(msg: impl Into<String>) -> KilnError {
    KilnError::MalformedFormula(msg.into())
}

fn parse_url(field: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| malformed(format!("{field} '{raw}' is not a valid URL: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(malformed(format!("{field} '{raw}' is not a hierarchical URL")));
    }
    Ok(url)
}

impl TryFrom<RawFormula> for Formula {
    type Error = KilnError;

    fn try_from(raw: RawFormula) -> Result<Self> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err(malformed("name must not be empty"));
        }
        if name.contains('/') || name.chars().any(char::is_whitespace) {
            return Err(malformed(format!(
                "name '{name}' must not contain '/' or whitespace"
            )));
        }

        let url = parse_url("url", &raw.url)?;
        let homepage = raw
            .homepage
            .as_deref()
            .map(|h| parse_url("homepage", h))
            .transpose()?;
        let head = raw
            .head
            .as_deref()
            .map(|h| parse_url("head", h))
            .transpose()?;

        let version = raw.version.trim().to_string();
        if parse_semver_like(&version).is_none() {
            return Err(malformed(format!(
                "version '{version}' is not a SemVer-like version"
            )));
        }

        let checksum = match (raw.sha256.as_deref(), raw.checksum.as_deref()) {
            (Some(hex), None) => Checksum::new(ChecksumAlgorithm::Sha256, hex)?,
            (None, Some(tagged)) => Checksum::parse_tagged(tagged)?,
            (Some(_), Some(_)) => return Err(malformed("give either sha256 or checksum, not both")),
            (None, None) => return Err(malformed("missing sha256 (or checksum)")),
        };

        let mut bottle = BTreeMap::new();
        for (platform, hex) in raw.bottle {
            let digest = Checksum::new(ChecksumAlgorithm::Sha256, &hex).map_err(|e| {
                malformed(format!("bottle digest for '{platform}': {e}"))
            })?;
            bottle.insert(platform, digest);
        }

        let mut seen = HashSet::new();
        for dep in &raw.dependencies {
            if dep.name.trim().is_empty() {
                return Err(malformed("dependency with an empty name"));
            }
            for (dep_name, tag) in dep.phase_pairs() {
                if !seen.insert((dep_name.to_string(), tag)) {
                    return Err(malformed(format!(
                        "dependency '{dep_name}' is declared more than once for phase {tag}"
                    )));
                }
            }
        }

        raw.build.validate().map_err(malformed)?;
        for (index, check) in raw.checks.iter().enumerate() {
            check
                .validate()
                .map_err(|e| malformed(format!("test #{index}: {e}")))?;
        }

        Ok(Formula {
            name,
            desc: raw.desc,
            homepage,
            url,
            head,
            version,
            revision: raw.revision,
            checksum,
            bottle,
            dependencies: raw.dependencies,
            build: raw.build,
            checks: raw.checks,
        })
    }
}

impl Formula {
    /// Loads a descriptor from disk; `.json` files are read as JSON, everything else as TOML.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!("Loading formula from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawFormula =
            toml::from_str(s).map_err(|e| malformed(format!("invalid descriptor: {e}")))?;
        Formula::try_from(raw)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: RawFormula =
            serde_json::from_str(s).map_err(|e| malformed(format!("invalid descriptor: {e}")))?;
        Formula::try_from(raw)
    }

    /// Gets the full version string including revision (e.g., "1.2.3_1").
    pub fn version_str_full(&self) -> String {
        if self.revision > 0 {
            format!("{}_{}", self.version, self.revision)
        } else {
            self.version.clone()
        }
    }

    // --- Accessors ---
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn source_url(&self) -> &Url {
        &self.url
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Gets the bottle digest for a platform (e.g., "catalina").
    pub fn bottle_digest(&self, platform: &str) -> Option<&Checksum> {
        self.bottle.get(platform)
    }

    pub fn build_dependencies(&self) -> Vec<&Dependency> {
        self.dependencies.build_time()
    }

    pub fn runtime_dependencies(&self) -> Vec<&Dependency> {
        self.dependencies.runtime()
    }

    /// `<cellar>/<name>/<version>[_<revision>]`.
    pub fn install_prefix(&self, cellar_path: &Path) -> PathBuf {
        cellar_path.join(self.name()).join(self.version_str_full())
    }
}
