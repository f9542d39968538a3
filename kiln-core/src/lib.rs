// kiln-core/src/lib.rs

// Declare the top-level modules within the library crate
pub mod build;
pub mod install;
pub mod pipeline;
pub mod verify;

#[cfg(test)]
mod test_support;

// Re-export key types for easier use by the CLI crate
pub use build::{BuildEnvironment, BuildExecutor, BuildWorkspace};
pub use install::InstallReceipt;
pub use pipeline::{InstallOptions, InstallPipeline};
pub use verify::Verifier;
