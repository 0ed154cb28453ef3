#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

#[allow(dead_code)]
pub const CMD_TIMEOUT: Duration = Duration::from_secs(15);

/// Create a configured `linewise` command suitable for integration tests.
///
/// Runs inside `dir` (so no stray `.env` is picked up), points the config at
/// a file that does not exist, and clears credentials and overrides.
#[allow(dead_code)]
pub fn linewise_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("linewise"));
    cmd.timeout(CMD_TIMEOUT);
    cmd.current_dir(dir);
    cmd.env("LINEWISE_CONFIG", dir.join("absent-config.toml"));
    cmd.env("LINEWISE_FORCE_NON_INTERACTIVE", "1");
    cmd.env("NO_COLOR", "1");
    for var in [
        "GEMINI_API_KEY",
        "LINEWISE_MODEL",
        "LINEWISE_BASE_URL",
        "LINEWISE_MAX_RETRIES",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Write `content` to `name` inside `dir`.
#[allow(dead_code)]
pub fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("failed to write fixture");
    path
}
