// kiln-core/src/pipeline/mod.rs
pub mod engine;

pub use engine::{InstallOptions, InstallPipeline};
