//! Command line front end of the Lightning time lock recovery tools.

/// Command implementations
pub mod commands;
/// Command line and config file parsing
pub mod config;
/// Rendering of command results
pub mod output;
