// kiln-aio/src/lib.rs
//! Blocking IO for kiln: process spawning, filesystem staging, archive extraction and
//! JSON files.

pub mod extract;
pub mod fs;
pub mod json_io;
pub mod process;

pub use extract::extract_source_archive;
pub use json_io::{read_json_sync, write_json_sync};
pub use process::{CommandOutput, CommandRunner, Invocation, SystemRunner};
