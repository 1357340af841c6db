//! Command implementations behind the `drive-indexer` binary.
pub mod commands;
pub mod render;
