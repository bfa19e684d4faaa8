//! Build script for grove-ai
//!
//! Exposes `GROVE_GIT_HASH` and `GROVE_BUILD_PROFILE` to the crate so the health
//! endpoint can report which build is running.

use std::process::Command;

fn main() {
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=GROVE_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=GROVE_BUILD_PROFILE={}", profile);
    println!("cargo:rerun-if-changed=build.rs");
}
