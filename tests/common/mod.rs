//! Shared test infrastructure for CLI integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A throwaway project directory holding an `smx.toml`.
pub struct ProjectFixture {
    pub dir: TempDir,
    pub file: PathBuf,
}

/// Captured result of one `smx` invocation.
#[derive(Debug)]
pub struct RunOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProjectFixture {
    pub fn new(project_toml: &str) -> Self {
        let dir = TempDir::new().expect("create project dir");
        let file = dir.path().join("smx.toml");
        fs::write(&file, project_toml).expect("write smx.toml");
        Self { dir, file }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Run `smx -f <project file> <args...>` with a clean CI environment.
    pub fn smx(&self, args: &[&str]) -> RunOutput {
        let output = Command::new(env!("CARGO_BIN_EXE_smx"))
            .arg("-f")
            .arg(&self.file)
            .args(args)
            .env_remove("GITHUB_STEP_SUMMARY")
            .env_remove("SMX_LOG")
            .output()
            .expect("spawn smx");
        RunOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}
