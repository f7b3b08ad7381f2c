use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

// Writes GIT_DESC, falling back to the package version outside a git checkout
fn main() {
    let desc = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("v{}", env::var("CARGO_PKG_VERSION").unwrap_or_default()));
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR");
    let dest = Path::new(&out_dir).join("version.rs");
    fs::write(&dest, format!("/// The build version\npub const GIT_DESC: &str = {:?};\n", desc))
        .expect("write version.rs");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
