// dbbackup/src/backup/command.rs
//! External dump/listing tools, behind a trait so drivers can be exercised without servers.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use which::which;

/// A fully described tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment for the child only. Used for secrets so they stay off the command line.
    pub envs: Vec<(String, String)>,
}

impl DumpCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        DumpCommand {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Tool file name, safe for logs.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// Empty when stdout was redirected to a file.
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Human readable failure summary: exit code plus trimmed stderr.
    pub fn failure_message(&self) -> String {
        let code = self
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        format!("exit code {}: {}", code, self.stderr.trim())
    }
}

pub trait CommandRunner: Send + Sync {
    /// Finds a tool on the local PATH. Never touches the network.
    fn locate(&self, tool: &str) -> Option<PathBuf>;

    /// Runs to completion, capturing stdout and stderr.
    fn capture(&self, command: &DumpCommand) -> io::Result<CommandOutput>;

    /// Runs to completion with stdout streamed into `stdout_path`.
    fn run_to_file(&self, command: &DumpCommand, stdout_path: &Path) -> io::Result<CommandOutput>;
}

/// Runs real processes found on PATH.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(command: &DumpCommand) -> Command {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        which(tool).ok()
    }

    fn capture(&self, command: &DumpCommand) -> io::Result<CommandOutput> {
        let output = Self::command(command).stdout(Stdio::piped()).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_to_file(&self, command: &DumpCommand, stdout_path: &Path) -> io::Result<CommandOutput> {
        let sink = File::create(stdout_path)?;
        let output = Self::command(command).stdout(Stdio::from(sink)).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: Vec::new(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
