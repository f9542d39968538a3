// kiln-common/src/model/mod.rs
// Declares the modules within the model directory.

pub mod build;
pub mod check;
pub mod formula;

// Re-export
pub use build::{BuildConfig, BuildSystem, FlagSpec, Overrides};
pub use check::{CheckSpec, OutputMatcher};
pub use formula::{Checksum, ChecksumAlgorithm, Formula};
