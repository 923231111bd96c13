//! Smoke tests for the `bazaar` binary
//!
//! These tests verify the binary can be invoked and handles offline
//! commands without a registry.
//! Run with: `cargo test --test cli_smoke`

use std::path::Path;
use std::process::{Command, Output};

fn bazaar(cache_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bazaar"))
        .arg("--cache-dir")
        .arg(cache_dir)
        .args(args)
        .env_remove("BAZAAR_EMAIL")
        .env_remove("BAZAAR_PASSWORD")
        .env_remove("BAZAAR_CACHE_DIR")
        .env("BAZAAR_BASE_URL", "http://127.0.0.1:9/api/")
        .output()
        .expect("Failed to run bazaar")
}

/// Test that bazaar --help lists the subcommands
#[test]
fn test_help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    let output = bazaar(dir.path(), &["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "bazaar --help failed: {}", stdout);
    for command in ["list", "cached", "pull", "push", "remove", "delete", "signup", "hash"] {
        assert!(stdout.contains(command), "help is missing '{}': {}", command, stdout);
    }
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    let output = bazaar(dir.path(), &["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "got: {}", stdout);
}

/// `hash` matches the library digest and needs no registry
#[test]
fn test_hash_command() {
    let cache = tempfile::tempdir().unwrap();
    let artifact = tempfile::tempdir().unwrap();
    std::fs::write(artifact.path().join("model.pkl"), b"weights").unwrap();

    let output = bazaar(cache.path(), &["hash", artifact.path().to_str().unwrap()]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let expected = model_bazaar::models::hash_tree(artifact.path()).unwrap();
    assert!(stdout.starts_with(&expected), "got: {}", stdout);
    assert!(stdout.contains("7 bytes"));
}

#[test]
fn test_hash_of_plain_file_fails() {
    let cache = tempfile::tempdir().unwrap();
    let artifact = tempfile::tempdir().unwrap();
    let file = artifact.path().join("model.pkl");
    std::fs::write(&file, b"weights").unwrap();

    let output = bazaar(cache.path(), &["hash", file.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

/// `cached` works offline against an empty cache
#[test]
fn test_cached_on_empty_cache() {
    let cache = tempfile::tempdir().unwrap();
    let output = bazaar(cache.path(), &["cached", "--verify", "--json"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(entries, serde_json::json!([]));
}

#[test]
fn test_pull_without_registry_fails() {
    let cache = tempfile::tempdir().unwrap();
    let output = bazaar(cache.path(), &["pull", "alice/search"]);
    assert!(!output.status.success());
}

#[test]
fn test_invalid_identifier_rejected() {
    let cache = tempfile::tempdir().unwrap();
    let output = bazaar(cache.path(), &["remove", "../etc"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("../etc"));
}

#[test]
fn test_email_without_password_fails() {
    let cache = tempfile::tempdir().unwrap();
    let output = bazaar(cache.path(), &["--email", "alice@example.com", "list"]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_config_file_fails() {
    let cache = tempfile::tempdir().unwrap();
    let output = bazaar(cache.path(), &["--config", "/nonexistent/config.toml", "cached"]);
    assert!(!output.status.success());
}
