// kiln-core/src/build/mod.rs
// Source builds: the sanitized environment and the two-phase executor.

use std::path::Path;

use kiln_common::model::build::BuildSystem;

pub mod env;
pub mod executor;

pub use env::BuildEnvironment;
pub use executor::{BuildExecutor, BuildWorkspace};

/// Arguments every configure invocation of `system` starts with.
pub fn standard_args(system: BuildSystem, prefix: &Path) -> Vec<String> {
    match system {
        BuildSystem::Cmake => vec![
            format!("-DCMAKE_INSTALL_PREFIX={}", prefix.display()),
            "-DCMAKE_INSTALL_LIBDIR=lib".to_string(),
            "-DCMAKE_BUILD_TYPE=Release".to_string(),
            "-DCMAKE_FIND_FRAMEWORK=LAST".to_string(),
            "-DCMAKE_VERBOSE_MAKEFILE=ON".to_string(),
            "-Wno-dev".to_string(),
        ],
        BuildSystem::Autotools => vec![
            format!("--prefix={}", prefix.display()),
            "--disable-dependency-tracking".to_string(),
            "--disable-silent-rules".to_string(),
        ],
        BuildSystem::Make => Vec::new(),
    }
}
