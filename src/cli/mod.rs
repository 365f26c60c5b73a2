//! Command handlers for the `custody` binary

pub mod commands;

pub use commands::*;
