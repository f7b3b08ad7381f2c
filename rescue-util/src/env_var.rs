use std::env;

/// Environment variable holding the root key, used when none is given on the
/// command line
pub const ROOTKEY_ENV: &str = "LNRESCUE_ROOTKEY";

/// The root key from the environment, if set and non-empty
pub fn root_key_from_env() -> Option<String> {
    env_nonempty(ROOTKEY_ENV)
}

/// A variable's trimmed value, if set and non-empty
pub fn env_nonempty(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
