// kiln-common/src/model/build.rs
//! Build configuration: which build system a formula uses and the ordered flags it
//! passes to the configuration tool.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{KilnError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSystem {
    /// `cmake <src> <flags>` then `make install`.
    #[default]
    Cmake,
    /// `<src>/configure <flags>` then `make install`.
    Autotools,
    /// No configuration tool; `make install` only.
    Make,
}

impl BuildSystem {
    pub fn has_configure_step(&self) -> bool {
        !matches!(self, BuildSystem::Make)
    }
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildSystem::Cmake => f.write_str("cmake"),
            BuildSystem::Autotools => f.write_str("autotools"),
            BuildSystem::Make => f.write_str("make"),
        }
    }
}

/// One entry of the configure flag list, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagSpec {
    /// Passed through verbatim. Never overridable.
    Raw { raw: String },
    Named {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default)]
        overridable: bool,
    },
}

impl FlagSpec {
    pub fn fixed(name: impl Into<String>, value: impl Into<String>) -> Self {
        FlagSpec::Named {
            name: name.into(),
            value: Some(value.into()),
            overridable: false,
        }
    }

    pub fn overridable(name: impl Into<String>, value: impl Into<String>) -> Self {
        FlagSpec::Named {
            name: name.into(),
            value: Some(value.into()),
            overridable: true,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            FlagSpec::Raw { .. } => None,
            FlagSpec::Named { name, .. } => Some(name),
        }
    }

    pub fn is_overridable(&self) -> bool {
        matches!(self, FlagSpec::Named { overridable: true, .. })
    }
}

/// `Some(value)` sets a flag's value, `None` disables it.
pub type Overrides = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default)]
    pub system: BuildSystem,
    #[serde(default)]
    pub flags: Vec<FlagSpec>,
    #[serde(default, deserialize_with = "deserialize_overrides")]
    pub overrides: Overrides,
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
}

fn default_targets() -> Vec<String> {
    vec!["install".to_string()]
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            system: BuildSystem::default(),
            flags: Vec::new(),
            overrides: Overrides::new(),
            targets: default_targets(),
        }
    }
}

impl BuildConfig {
    /// Structural checks run when a formula is loaded.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for flag in &self.flags {
            match flag {
                FlagSpec::Raw { raw } if raw.trim().is_empty() => {
                    return Err("build.flags contains an empty raw flag".to_string());
                }
                FlagSpec::Named { name, .. } => {
                    if name.trim().is_empty() {
                        return Err("build.flags contains a flag with an empty name".to_string());
                    }
                    if !seen.insert(name.as_str()) {
                        return Err(format!("build.flags declares '{name}' more than once"));
                    }
                }
                FlagSpec::Raw { .. } => {}
            }
        }
        self.check_overrides(&self.overrides)
            .map_err(|e| format!("build.overrides: {e}"))?;
        if self.targets.is_empty() || self.targets.iter().any(|t| t.trim().is_empty()) {
            return Err("build.targets must name at least one non-empty target".to_string());
        }
        Ok(())
    }

    fn check_overrides(&self, overrides: &Overrides) -> Result<()> {
        for name in overrides.keys() {
            match self.flags.iter().find(|f| f.name() == Some(name.as_str())) {
                None => {
                    return Err(KilnError::InvalidOverride(
                        name.clone(),
                        "no such flag is declared".to_string(),
                    ))
                }
                Some(flag) if !flag.is_overridable() => {
                    return Err(KilnError::InvalidOverride(
                        name.clone(),
                        "flag is fixed".to_string(),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// The configure flag list: `standard_args` followed by every declared flag in
    /// declaration order, with overrides substituted by name.
    ///
    /// Host overrides take precedence over the formula's own. The result depends only on
    /// the inputs, so equal inputs give byte-identical lists.
    pub fn configure_args(
        &self,
        standard_args: &[String],
        host_overrides: &Overrides,
    ) -> Result<Vec<String>> {
        self.check_overrides(host_overrides)?;

        let mut args = standard_args.to_vec();
        for flag in &self.flags {
            match flag {
                FlagSpec::Raw { raw } => args.push(raw.clone()),
                FlagSpec::Named { name, value, .. } => {
                    let state = match host_overrides.get(name).or_else(|| self.overrides.get(name)) {
                        Some(Some(v)) => FlagState::Value(v),
                        Some(None) => FlagState::Disabled,
                        None => match value {
                            Some(v) => FlagState::Value(v),
                            None => FlagState::Bare,
                        },
                    };
                    args.push(render_flag(self.system, name, state));
                }
            }
        }
        Ok(args)
    }
}

#[derive(Debug, Clone, Copy)]
enum FlagState<'a> {
    Value(&'a str),
    Bare,
    Disabled,
}

fn render_flag(system: BuildSystem, name: &str, state: FlagState<'_>) -> String {
    match system {
        BuildSystem::Cmake => match state {
            FlagState::Value(v) => format!("-D{name}={v}"),
            FlagState::Bare | FlagState::Disabled => format!("-D{name}="),
        },
        BuildSystem::Autotools | BuildSystem::Make => match state {
            FlagState::Value(v) => format!("--{name}={v}"),
            FlagState::Bare => format!("--{name}"),
            FlagState::Disabled => {
                if let Some(rest) = name.strip_prefix("enable-") {
                    format!("--disable-{rest}")
                } else if let Some(rest) = name.strip_prefix("with-") {
                    format!("--without-{rest}")
                } else {
                    format!("--{name}=")
                }
            }
        },
    }
}

// TOML has no null, so a disabled override is written as `false`.
fn deserialize_overrides<'de, D>(deserializer: D) -> std::result::Result<Overrides, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawOverride {
        Value(String),
        Toggle(bool),
    }

    let raw: BTreeMap<String, Option<RawOverride>> = BTreeMap::deserialize(deserializer)?;
    let mut overrides = Overrides::new();
    for (name, value) in raw {
        let value = match value {
            Some(RawOverride::Value(v)) => Some(v),
            Some(RawOverride::Toggle(false)) | None => None,
            Some(RawOverride::Toggle(true)) => {
                return Err(serde::de::Error::custom(format!(
                    "override '{name}' must be a string value or false"
                )))
            }
        };
        overrides.insert(name, value);
    }
    Ok(overrides)
}

/// Parses a host override: `NAME=VALUE` sets a value, `NAME` alone disables the flag.
pub fn parse_override(spec: &str) -> Result<(String, Option<String>)> {
    let (name, value) = match spec.split_once('=') {
        Some((name, value)) => (name.trim(), Some(value.to_string())),
        None => (spec.trim(), None),
    };
    if name.is_empty() {
        return Err(KilnError::InvalidOverride(
            spec.to_string(),
            "missing flag name".to_string(),
        ));
    }
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oiio_like() -> BuildConfig {
        BuildConfig {
            system: BuildSystem::Cmake,
            flags: vec![
                FlagSpec::Named {
                    name: "CCACHE_FOUND".into(),
                    value: None,
                    overridable: false,
                },
                FlagSpec::overridable("EMBEDPLUGINS", "ON"),
                FlagSpec::overridable("USE_QT", "OFF"),
                FlagSpec::fixed("USE_NUKE", "OFF"),
                FlagSpec::Raw {
                    raw: "-Wno-dev".into(),
                },
            ],
            ..BuildConfig::default()
        }
    }

    #[test]
    fn declared_order_follows_standard_args() {
        let args = oiio_like()
            .configure_args(&["-DCMAKE_BUILD_TYPE=Release".to_string()], &Overrides::new())
            .unwrap();
        assert_eq!(
            args,
            [
                "-DCMAKE_BUILD_TYPE=Release",
                "-DCCACHE_FOUND=",
                "-DEMBEDPLUGINS=ON",
                "-DUSE_QT=OFF",
                "-DUSE_NUKE=OFF",
                "-Wno-dev",
            ]
        );
    }

    #[test]
    fn overrides_replace_values_in_place() {
        let mut overrides = Overrides::new();
        overrides.insert("USE_QT".into(), Some("ON".into()));
        overrides.insert("EMBEDPLUGINS".into(), None);
        let args = oiio_like().configure_args(&[], &overrides).unwrap();
        assert_eq!(
            args,
            ["-DCCACHE_FOUND=", "-DEMBEDPLUGINS=", "-DUSE_QT=ON", "-DUSE_NUKE=OFF", "-Wno-dev"]
        );
    }

    #[test]
    fn repeated_rendering_is_byte_identical() {
        let config = oiio_like();
        let mut overrides = Overrides::new();
        overrides.insert("USE_QT".into(), Some("ON".into()));
        let std_args = vec!["-DCMAKE_INSTALL_PREFIX=/opt/kiln/Cellar/x/1.0.0".to_string()];
        let first = config.configure_args(&std_args, &overrides).unwrap();
        let second = config.configure_args(&std_args, &overrides).unwrap();
        assert_eq!(first.join("\0").into_bytes(), second.join("\0").into_bytes());
    }

    #[test]
    fn host_overrides_beat_formula_overrides() {
        let mut config = oiio_like();
        config.overrides.insert("USE_QT".into(), Some("ON".into()));
        let mut host = Overrides::new();
        host.insert("USE_QT".into(), None);
        let args = config.configure_args(&[], &host).unwrap();
        assert!(args.contains(&"-DUSE_QT=".to_string()));
    }

    #[test]
    fn fixed_and_unknown_flags_cannot_be_overridden() {
        let config = oiio_like();
        let mut fixed = Overrides::new();
        fixed.insert("USE_NUKE".into(), Some("ON".into()));
        assert!(matches!(
            config.configure_args(&[], &fixed),
            Err(KilnError::InvalidOverride(name, _)) if name == "USE_NUKE"
        ));

        let mut unknown = Overrides::new();
        unknown.insert("USE_MAGIC".into(), None);
        assert!(config.configure_args(&[], &unknown).is_err());
    }

    #[test]
    fn autotools_disable_forms() {
        let config = BuildConfig {
            system: BuildSystem::Autotools,
            flags: vec![
                FlagSpec::Named {
                    name: "enable-shared".into(),
                    value: None,
                    overridable: true,
                },
                FlagSpec::overridable("with-zlib", "/usr"),
                FlagSpec::overridable("libdir", "/usr/lib"),
            ],
            ..BuildConfig::default()
        };
        let defaults = config.configure_args(&[], &Overrides::new()).unwrap();
        assert_eq!(defaults, ["--enable-shared", "--with-zlib=/usr", "--libdir=/usr/lib"]);

        let overrides: Overrides = ["enable-shared", "with-zlib", "libdir"]
            .into_iter()
            .map(|n| (n.to_string(), None))
            .collect();
        let disabled = config.configure_args(&[], &overrides).unwrap();
        assert_eq!(disabled, ["--disable-shared", "--without-zlib", "--libdir="]);
    }

    #[test]
    fn duplicate_flag_names_fail_validation() {
        let mut config = oiio_like();
        config.flags.push(FlagSpec::fixed("USE_QT", "ON"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml_table() {
        let config: BuildConfig = toml::from_str(
            r#"
system = "cmake"
flags = [
  { name = "EMBEDPLUGINS", value = "ON", overridable = true },
  { raw = "-Wno-dev" },
]
[overrides]
EMBEDPLUGINS = false
"#,
        )
        .unwrap();
        assert_eq!(config.targets, ["install"]);
        assert_eq!(config.overrides.get("EMBEDPLUGINS"), Some(&None));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn host_override_syntax() {
        assert_eq!(
            parse_override("USE_QT=ON").unwrap(),
            ("USE_QT".to_string(), Some("ON".to_string()))
        );
        assert_eq!(parse_override("USE_QT").unwrap(), ("USE_QT".to_string(), None));
        assert_eq!(
            parse_override("CCACHE_FOUND=").unwrap(),
            ("CCACHE_FOUND".to_string(), Some(String::new()))
        );
        assert!(parse_override("=ON").is_err());
    }
}
