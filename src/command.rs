//! Run an external disk-image tool
//!
//! Output is captured and only shown when the tool fails, or at debug level.

use std::{
    ffi::OsString,
    fmt::Display,
    process::Stdio,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Convert a duration into a formatted string.
pub fn duration_string(duration: &Duration) -> String {
    let seconds = duration.as_secs() % 60;
    let minutes = (duration.as_secs() / 60) % 60;
    let hours = (duration.as_secs() / 60) / 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[derive(Debug)]
pub enum ExternalToolErrorKind {
    BadExitCode,
    FailedToStart(std::io::Error),
}

impl Display for ExternalToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadExitCode => f.write_str("bad exit code"),
            Self::FailedToStart(err) => write!(f, "failed to start: {err}"),
        }
    }
}

/// An external tool could not be run, or exited with a non-zero status.
#[derive(Error, Debug)]
#[error("{cmd} {kind} (exit code {exit_code}, after {})\n{}", duration_string(.duration), quoted_output(.stdout, .stderr))]
pub struct ExternalToolError {
    pub cmd: CommandLine,
    pub kind: ExternalToolErrorKind,
    pub exit_code: i32,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

fn quoted_output(stdout: &str, stderr: &str) -> String {
    let mut text = String::new();
    for (name, output) in [("stdout", stdout), ("stderr", stderr)] {
        text.push_str(name);
        text.push_str(":\n");
        for line in output.lines() {
            text.push_str("--> ");
            text.push_str(line);
            text.push('\n');
        }
    }
    text
}

/// A program plus its arguments.
#[derive(Clone, Eq, PartialEq)]
pub struct CommandLine {
    cmd: OsString,
    args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(cmd: impl Into<OsString>) -> Self {
        CommandLine {
            cmd: cmd.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `--name=value`.
    #[must_use]
    pub fn opt(self, name: &str, value: impl Into<OsString>) -> Self {
        let mut arg = OsString::from(format!("--{name}="));
        arg.push(value.into());
        self.arg(arg)
    }

    #[must_use]
    pub fn arg_if(self, condition: bool, arg: impl Into<OsString>) -> Self {
        if condition { self.arg(arg) } else { self }
    }

    /// Run to completion. Anything but exit status 0 is an error.
    pub async fn run(&self) -> Result<(), ExternalToolError> {
        debug!("Running {self}");
        let start = Instant::now();

        let result = Command::new(&self.cmd)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        let duration = start.elapsed();

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                return Err(ExternalToolError {
                    cmd: self.clone(),
                    kind: ExternalToolErrorKind::FailedToStart(err),
                    exit_code: -1,
                    duration,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
        };

        // Tools may print localized or file name bytes that are not UTF-8.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(ExternalToolError {
                cmd: self.clone(),
                kind: ExternalToolErrorKind::BadExitCode,
                exit_code: output.status.code().unwrap_or(-1),
                duration,
                stdout: stdout.into_owned(),
                stderr: stderr.into_owned(),
            });
        }

        for line in stdout.lines().chain(stderr.lines()) {
            debug!("--> {line}");
        }
        debug!("Finished in {}", duration_string(&duration));
        Ok(())
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", self.cmd.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " '{}'", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandLine({self})")
    }
}
