// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=MOVIE_INPUT_VERSION");

    // Packagers can pin the version without a git checkout
    let version = std::env::var("MOVIE_INPUT_VERSION")
        .ok()
        .or_else(git_version)
        .unwrap_or_else(|| env_or("CARGO_PKG_VERSION", "unknown"));

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `0.1.0-abcdef1` at a tag, `0.1.0-dirty-abcdef1` past it, or the bare
/// commit hash without tags
fn git_version() -> Option<String> {
    let hash = git(&["rev-parse", "--short", "HEAD"])?;
    let Some(described) = git(&["describe", "--tags", "--match", "v*"]) else {
        return Some(format!("{}-{}", env_or("CARGO_PKG_VERSION", "0.0.0"), hash));
    };
    let described = described.strip_prefix('v').unwrap_or(&described);

    // describe output past a tag: <tag>-<commits>-g<hash>
    let parts: Vec<&str> = described.rsplitn(3, '-').collect();
    if parts.len() == 3 && parts[0].starts_with('g') {
        Some(format!("{}-dirty-{}", parts[2], hash))
    } else {
        Some(format!("{}-{}", described, hash))
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn env_or(name: &str, fallback: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| fallback.to_string())
}
