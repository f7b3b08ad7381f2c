/// Script templates of to_local outputs
pub mod script;
/// Sweep transaction construction and signing
pub mod sweep;
