//! External command invocation.
//!
//! Every process the runner starts goes through `CommandRunner`, so tests can
//! substitute a recording double for the real `std::process` backend.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;

/// How a command's output streams are wired.
#[derive(Debug, Default)]
pub enum CommandIo {
    /// Inherit the runner's stdout and stderr.
    #[default]
    Inherit,
    /// Capture both streams into the returned output.
    Capture,
    /// Send stdout to an already-open file; stderr is inherited.
    StdoutTo(File),
}

/// A fully resolved external command.
#[derive(Debug, Default)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub io: CommandIo,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn io(mut self, io: CommandIo) -> Self {
        self.io = io;
        self
    }

    /// Shell-quoted rendering for logs and diagnostics.
    pub fn display(&self) -> String {
        let program = self
            .program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string());
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(program);
        parts.extend(self.args.iter().cloned());
        shell_words::join(parts)
    }
}

/// Result of one finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn status_string(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// The single capability used to start external processes.
pub trait CommandRunner {
    /// Run `command` to completion. Errors mean the process could not be
    /// started at all; a non-zero exit is reported through the output.
    fn execute(&mut self, command: CommandSpec) -> Result<CommandOutput>;

    /// Whether `program` can be found on `PATH`.
    fn program_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Runs commands with `std::process`.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(&mut self, command: CommandSpec) -> Result<CommandOutput> {
        let command_line = command.display();
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::inherit());

        let started = Instant::now();
        let output = match command.io {
            CommandIo::Inherit => {
                let status = cmd.status().with_context(|| format!("spawn {command_line}"))?;
                CommandOutput {
                    exit_code: status.code(),
                    ..CommandOutput::default()
                }
            }
            CommandIo::StdoutTo(file) => {
                cmd.stdout(Stdio::from(file));
                let status = cmd.status().with_context(|| format!("spawn {command_line}"))?;
                CommandOutput {
                    exit_code: status.code(),
                    ..CommandOutput::default()
                }
            }
            CommandIo::Capture => {
                let output = cmd.output().with_context(|| format!("spawn {command_line}"))?;
                CommandOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
        };
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            exit_code = ?output.exit_code,
            command = %command_line,
            "command finished"
        );
        Ok(output)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_and_strips_program_dir() {
        let spec = CommandSpec::new("/venv/bin/python").args(["-m", "pip install", "ruff"]);
        assert_eq!(spec.display(), "python -m 'pip install' ruff");
    }

    #[test]
    fn status_string_reports_signal_termination() {
        let output = CommandOutput::default();
        assert!(!output.success());
        assert_eq!(output.status_string(), "terminated by signal");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output_and_exit_code() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .io(CommandIo::Capture);
        let output = SystemRunner.execute(spec).unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn system_runner_reports_spawn_failure_as_error() {
        let spec = CommandSpec::new("smx-definitely-not-a-program").io(CommandIo::Capture);
        assert!(SystemRunner.execute(spec).is_err());
    }
}
