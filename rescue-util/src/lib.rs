//! Utility functions for the Lightning recovery tools

pub mod config;
pub mod env_var;
pub mod util;

pub use env_var::*;

// Defines GIT_DESC
include!(concat!(env!("OUT_DIR"), "/version.rs"));
