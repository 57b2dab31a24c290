// crates/stackcore/src/events/mod.rs

mod base;

pub use base::{CompletionMetadata, ErrorKind, RunEvent, ValidationReport};
