//! CLI command implementations.

pub mod bench;
