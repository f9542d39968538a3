// kiln-common/src/dependency/resolver.rs
//! Maps a formula's declared dependencies onto already-installed prefixes.
//!
//! kiln never installs prerequisites itself; a resolver only reports where each one
//! lives, or which one is missing.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, error};

use crate::dependency::{Dependency, DependencyTag};
use crate::error::{KilnError, Result};
use crate::keg::KegRegistry;
use crate::model::formula::Formula;

/// A declared dependency that is present on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub name: String,
    pub tags: DependencyTag,
    pub prefix: PathBuf,
}

pub trait DependencyResolver {
    /// Resolves one installation prefix for `dep`.
    fn resolve_one(&self, dep: &Dependency) -> Result<PathBuf>;

    /// Resolves every declared dependency whose tags intersect `include`, in declaration
    /// order. Fails on the first dependency that is not installed.
    fn resolve(&self, formula: &Formula, include: DependencyTag) -> Result<Vec<ResolvedDependency>> {
        debug!(
            "Resolving {} dependencies of '{}' (include: {})",
            formula.dependencies.len(),
            formula.name(),
            include
        );
        let mut resolved = Vec::with_capacity(formula.dependencies.len());
        for dep in formula.dependencies.iter().filter(|d| d.tags.intersects(include)) {
            let prefix = self.resolve_one(dep).map_err(|e| {
                error!("Dependency '{}' of '{}' is not satisfied: {}", dep.name, formula.name(), e);
                e
            })?;
            debug!("Resolved '{}' ({}) -> {}", dep.name, dep.tags, prefix.display());
            resolved.push(ResolvedDependency {
                name: dep.name.clone(),
                tags: dep.tags,
                prefix,
            });
        }
        Ok(resolved)
    }
}

/// Resolves against the kiln root: `opt/<name>` first, then the newest Cellar keg.
#[derive(Debug, Clone)]
pub struct KegResolver {
    registry: KegRegistry,
}

impl KegResolver {
    pub fn new(registry: KegRegistry) -> Self {
        Self { registry }
    }
}

impl DependencyResolver for KegResolver {
    fn resolve_one(&self, dep: &Dependency) -> Result<PathBuf> {
        let opt_path = self.registry.get_opt_path(&dep.name);
        if opt_path.exists() {
            return Ok(opt_path);
        }
        match self.registry.get_installed_keg(&dep.name)? {
            Some(keg) => Ok(keg.path),
            None => Err(KilnError::UnresolvedDependency {
                name: dep.name.clone(),
                reason: format!(
                    "not installed (looked in {} and {})",
                    opt_path.display(),
                    self.registry.cellar_path().join(&dep.name).display()
                ),
            }),
        }
    }
}

/// Resolver over prefixes the host computed up front.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    prefixes: HashMap<String, PathBuf>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        self.prefixes.insert(name.into(), prefix.into());
        self
    }
}

impl DependencyResolver for StaticResolver {
    fn resolve_one(&self, dep: &Dependency) -> Result<PathBuf> {
        self.prefixes
            .get(&dep.name)
            .cloned()
            .ok_or_else(|| KilnError::UnresolvedDependency {
                name: dep.name.clone(),
                reason: "no prefix registered".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::Config;

    fn formula_with(deps: &str) -> Formula {
        let src = format!(
            r#"
name = "demo"
url = "https://example.com/demo-1.0.0.tar.gz"
version = "1.0.0"
sha256 = "{}"
dependencies = {deps}
"#,
            "a".repeat(64)
        );
        Formula::from_toml_str(&src).unwrap()
    }

    #[test]
    fn resolves_in_declaration_order() {
        let formula = formula_with(r#"["zlib", { name = "cmake", tags = ["build"] }, "libpng"]"#);
        let resolver = StaticResolver::new()
            .with("libpng", "/p/libpng")
            .with("zlib", "/p/zlib")
            .with("cmake", "/p/cmake");
        let names: Vec<String> = resolver
            .resolve(&formula, DependencyTag::all())
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["zlib", "cmake", "libpng"]);
    }

    #[test]
    fn missing_dependency_is_named() {
        let formula = formula_with(r#"["zlib", "jpeg"]"#);
        let resolver = StaticResolver::new().with("zlib", "/p/zlib");
        match resolver.resolve(&formula, DependencyTag::all()) {
            Err(KilnError::UnresolvedDependency { name, .. }) => assert_eq!(name, "jpeg"),
            other => panic!("expected UnresolvedDependency, got {other:?}"),
        }
    }

    #[test]
    fn excluded_tags_are_not_resolved() {
        let formula = formula_with(r#"[{ name = "fixture-tool", tags = ["test"] }]"#);
        let resolver = StaticResolver::new();
        let resolved = resolver
            .resolve(&formula, DependencyTag::BUILD | DependencyTag::RUNTIME)
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn keg_resolver_prefers_opt_then_cellar() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path());
        fs::create_dir_all(config.formula_opt_path("zlib")).unwrap();
        let jpeg = config.formula_keg_path("jpeg", "9e");
        fs::create_dir_all(&jpeg).unwrap();
        fs::write(jpeg.join(crate::keg::RECEIPT_FILE_NAME), "{}").unwrap();

        let resolver = KegResolver::new(KegRegistry::new(config.clone()));
        let resolved = resolver
            .resolve(&formula_with(r#"["zlib", "jpeg"]"#), DependencyTag::all())
            .unwrap();
        assert_eq!(resolved[0].prefix, config.formula_opt_path("zlib"));
        assert_eq!(resolved[1].prefix, config.formula_keg_path("jpeg", "9e"));
    }

    #[test]
    fn keg_resolver_skips_kegs_from_failed_runs() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path());
        fs::create_dir_all(config.formula_keg_path("libfoo", "1.0.0").join("lib")).unwrap();

        let resolver = KegResolver::new(KegRegistry::new(config));
        match resolver.resolve(&formula_with(r#"["libfoo"]"#), DependencyTag::all()) {
            Err(KilnError::UnresolvedDependency { name, .. }) => assert_eq!(name, "libfoo"),
            other => panic!("expected UnresolvedDependency, got {other:?}"),
        }
    }
}
