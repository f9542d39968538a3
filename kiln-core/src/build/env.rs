// kiln-core/src/build/env.rs
//! The sanitized environment every build tool and check runs in.
//!
//! Host variables are dropped unless they are on a short keep-list, and `PATH` is
//! rebuilt so resolved dependencies win over whatever the host has installed.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use kiln_common::config::Config;
use kiln_common::dependency::{DependencyTag, ResolvedDependency};
use kiln_common::error::{KilnError, Result};
use tracing::debug;

// Host variables that survive sanitization.
const ENV_VARS_TO_KEEP: &[&str] = &[
    "USER", "LOGNAME", "HOME", "TMPDIR", "TERM", "SHELL", "LANG", "LC_ALL", "LC_CTYPE", "TZ",
];

const SYSTEM_PATH_DIRS: &[&str] = &["/usr/bin", "/bin", "/usr/sbin", "/sbin"];

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_FALLBACK_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
    path_dirs: Vec<PathBuf>,
}

impl BuildEnvironment {
    /// Builds the environment from the current process environment.
    pub fn new(config: &Config, deps: &[ResolvedDependency], jobs: usize) -> Result<Self> {
        Self::from_host_vars(env::vars(), config, deps, jobs)
    }

    /// Builds the environment from an explicit set of host variables.
    pub fn from_host_vars<I>(
        host_vars: I,
        config: &Config,
        deps: &[ResolvedDependency],
        jobs: usize,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars = BTreeMap::new();
        let mut host_path = None;
        for (key, value) in host_vars {
            if key == "PATH" {
                host_path = Some(value);
            } else if ENV_VARS_TO_KEEP.contains(&key.as_str()) {
                vars.insert(key, value);
            }
        }

        // Build dependencies first, then runtime ones, each in declaration order.
        let mut path_dirs: Vec<PathBuf> = Vec::new();
        let ordered = deps
            .iter()
            .filter(|d| d.tags.contains(DependencyTag::BUILD))
            .chain(deps.iter().filter(|d| !d.tags.contains(DependencyTag::BUILD)));
        for dep in ordered {
            for sub in ["bin", "sbin"] {
                let dir = dep.prefix.join(sub);
                if dir.is_dir() {
                    debug!("Adding dependency dir to PATH: {}", dir.display());
                    path_dirs.push(dir);
                }
            }
        }
        let root_bin = config.bin_dir();
        if root_bin.is_dir() {
            path_dirs.push(root_bin);
        }
        path_dirs.extend(SYSTEM_PATH_DIRS.iter().map(PathBuf::from));
        if let Some(host_path) = host_path {
            path_dirs.extend(env::split_paths(&host_path).filter(|p| !p.as_os_str().is_empty()));
        }
        let mut unique = Vec::with_capacity(path_dirs.len());
        for dir in path_dirs {
            if !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        let path_dirs = unique;
        vars.insert("PATH".to_string(), join_paths("PATH", &path_dirs)?);

        let mut pkg_config_dirs = Vec::new();
        let mut aclocal_dirs = Vec::new();
        let mut include_flags = Vec::new();
        let mut lib_flags = Vec::new();
        for dep in deps {
            for sub in ["lib/pkgconfig", "share/pkgconfig"] {
                let dir = dep.prefix.join(sub);
                if dir.is_dir() {
                    pkg_config_dirs.push(dir);
                }
            }
            let aclocal = dep.prefix.join("share/aclocal");
            if aclocal.is_dir() {
                aclocal_dirs.push(aclocal);
            }
            let include = dep.prefix.join("include");
            if include.is_dir() {
                include_flags.push(format!("-I{}", include.display()));
            }
            let lib = dep.prefix.join("lib");
            if lib.is_dir() {
                lib_flags.push(format!("-L{}", lib.display()));
            }
        }
        let cmake_prefixes: Vec<PathBuf> = deps.iter().map(|d| d.prefix.clone()).collect();

        set_path_list_var(&mut vars, "PKG_CONFIG_PATH", &pkg_config_dirs)?;
        set_path_list_var(&mut vars, "ACLOCAL_PATH", &aclocal_dirs)?;
        set_path_list_var(&mut vars, "CMAKE_PREFIX_PATH", &cmake_prefixes)?;
        if !include_flags.is_empty() {
            vars.insert("CPPFLAGS".to_string(), include_flags.join(" "));
        }
        if !lib_flags.is_empty() {
            vars.insert("LDFLAGS".to_string(), lib_flags.join(" "));
        }
        vars.insert("MAKEFLAGS".to_string(), format!("-j{}", jobs.max(1)));
        vars.insert(
            "KILN_ROOT".to_string(),
            config.kiln_root().to_string_lossy().into_owned(),
        );

        debug!(
            "Build environment ready: {} vars, PATH={}",
            vars.len(),
            vars.get("PATH").map(String::as_str).unwrap_or_default()
        );
        Ok(Self { vars, path_dirs })
    }

    pub fn get_path_string(&self) -> Option<&str> {
        self.get_var("PATH")
    }

    pub fn path_dirs(&self) -> &[PathBuf] {
        &self.path_dirs
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn get_vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Derives the environment checks run in: the installed keg's `bin` and `sbin`
    /// lead PATH, its Python `site-packages` directories form `PYTHONPATH`, and its
    /// `lib` is put on the dynamic loader path.
    pub fn for_keg(&self, keg: &Path) -> Result<Self> {
        let mut vars = self.vars.clone();

        let mut path_dirs: Vec<PathBuf> = ["bin", "sbin"]
            .iter()
            .map(|sub| keg.join(sub))
            .filter(|dir| dir.is_dir())
            .collect();
        for dir in &self.path_dirs {
            if !path_dirs.contains(dir) {
                path_dirs.push(dir.clone());
            }
        }
        vars.insert("PATH".to_string(), join_paths("PATH", &path_dirs)?);

        let lib = keg.join("lib");
        let mut site_packages = Vec::new();
        if lib.is_dir() {
            for entry in std::fs::read_dir(&lib)? {
                let path = entry?.path();
                let is_python = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("python"));
                if is_python && path.join("site-packages").is_dir() {
                    site_packages.push(path.join("site-packages"));
                }
            }
            site_packages.sort();
            prepend_path_list_var(&mut vars, LIBRARY_PATH_VAR, &[lib])?;
        }
        set_path_list_var(&mut vars, "PYTHONPATH", &site_packages)?;

        debug!(
            "Check environment for {}: PATH={}, PYTHONPATH={}",
            keg.display(),
            vars.get("PATH").map(String::as_str).unwrap_or_default(),
            vars.get("PYTHONPATH").map(String::as_str).unwrap_or_default()
        );
        Ok(Self { vars, path_dirs })
    }

    /// Locates `tool` on the build PATH. Falls back to the bare name so the
    /// spawn itself reports a missing tool.
    pub fn resolve_tool(&self, tool: &str, cwd: &Path) -> PathBuf {
        match which::which_in(tool, self.get_path_string(), cwd) {
            Ok(path) => {
                debug!("Resolved {} -> {}", tool, path.display());
                path
            }
            Err(e) => {
                debug!("{} not found on build PATH ({}), deferring to spawn", tool, e);
                PathBuf::from(tool)
            }
        }
    }
}

fn join_paths(name: &str, dirs: &[PathBuf]) -> Result<String> {
    env::join_paths(dirs)
        .map_err(|e| KilnError::BuildEnvError(format!("Failed to join paths for {name}: {e}")))?
        .into_string()
        .map_err(|os| {
            KilnError::BuildEnvError(format!("{name} contains non-UTF8 characters: {os:?}"))
        })
}

fn set_path_list_var(
    vars: &mut BTreeMap<String, String>,
    name: &str,
    paths: &[PathBuf],
) -> Result<()> {
    if paths.is_empty() {
        debug!("No directories for {}, not setting variable.", name);
        return Ok(());
    }
    vars.insert(name.to_string(), join_paths(name, paths)?);
    Ok(())
}

fn prepend_path_list_var(
    vars: &mut BTreeMap<String, String>,
    name: &str,
    paths: &[PathBuf],
) -> Result<()> {
    let mut all = paths.to_vec();
    if let Some(existing) = vars.get(name) {
        all.extend(env::split_paths(existing).filter(|p| !p.as_os_str().is_empty()));
    }
    set_path_list_var(vars, name, &all)
}
