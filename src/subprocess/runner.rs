use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use tokio::io::AsyncRead;

use super::error::ProcessError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessCommand {
    /// Parse a command line into a program and its arguments.
    ///
    /// The line is split once at the first whitespace run: everything before
    /// it is the program, everything after it is the argument string, which
    /// is then broken into arguments on whitespace. Quotes and escapes have no
    /// special meaning.
    pub fn parse(command_line: &str) -> Result<Self, ProcessError> {
        let line = command_line.trim();
        if line.is_empty() {
            return Err(ProcessError::InvalidArgument(
                "command must not be empty".to_string(),
            ));
        }

        let (program, arguments) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        Ok(Self {
            program: program.to_string(),
            args: arguments.split_whitespace().map(String::from).collect(),
            env: HashMap::new(),
            working_dir: None,
        })
    }
}

impl FromStr for ProcessCommand {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Readable half of a child's output pipe
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Handle to a running child process with captured output streams
#[async_trait]
pub trait ChildProcess: Send {
    /// Take the standard output stream; `None` once taken
    fn take_stdout(&mut self) -> Option<BoxedReader>;

    /// Take the standard error stream; `None` once taken
    fn take_stderr(&mut self) -> Option<BoxedReader>;

    /// Exit code if the process has already exited, without blocking
    fn try_wait(&mut self) -> Result<Option<i32>, ProcessError>;

    /// Ask the process to terminate without waiting for it
    fn start_kill(&mut self) -> Result<(), ProcessError>;

    /// Wait for the process to exit and return its exit code.
    ///
    /// Must be cancel safe: the pump races it against stream reads.
    async fn wait(&mut self) -> Result<i32, ProcessError>;
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(&self, command: &ProcessCommand) -> Result<Box<dyn ChildProcess>, ProcessError>;
}

/// Flag keeping console programs from opening a window on Windows
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Convert a std ExitStatus to a plain exit code
    fn convert_exit_status(status: std::process::ExitStatus) -> i32 {
        match status.code() {
            Some(code) => code,
            None => Self::signal_exit_code(status),
        }
    }

    /// Shell convention for a process killed by a signal: 128 + signal number
    #[cfg(unix)]
    fn signal_exit_code(status: std::process::ExitStatus) -> i32 {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map_or(-1, |signal| 128 + signal)
    }

    #[cfg(not(unix))]
    fn signal_exit_code(_status: std::process::ExitStatus) -> i32 {
        -1
    }

    /// Log command execution details
    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!("Executing subprocess: {}", command);

        if !command.env.is_empty() {
            tracing::trace!("Environment overrides: {:?}", command.env);
        }

        if let Some(ref dir) = command.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }
    }

    /// Configure the command with environment and working directory
    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);

        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(windows)]
        {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        Self::configure_stdio(&mut cmd);
        cmd
    }

    /// Configure stdio pipes for the process
    fn configure_stdio(cmd: &mut tokio::process::Command) {
        cmd.stdin(std::process::Stdio::inherit());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
    }

    /// Map spawn error to ProcessError
    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: command.to_string(),
                source: error,
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn(&self, command: &ProcessCommand) -> Result<Box<dyn ChildProcess>, ProcessError> {
        Self::log_command_start(command);

        let mut cmd = Self::configure_command(command);
        let child = cmd.spawn().map_err(|e| {
            tracing::error!(
                "Failed to spawn '{}': {:?} (kind: {:?})",
                command.program,
                e,
                e.kind()
            );
            Self::map_spawn_error(e, command)
        })?;

        Ok(Box::new(TokioChild { child }))
    }
}

/// [`ChildProcess`] backed by a tokio child
struct TokioChild {
    child: tokio::process::Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::pin(stdout) as BoxedReader)
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::pin(stderr) as BoxedReader)
    }

    fn try_wait(&mut self) -> Result<Option<i32>, ProcessError> {
        Ok(self
            .child
            .try_wait()?
            .map(TokioProcessRunner::convert_exit_status))
    }

    fn start_kill(&mut self) -> Result<(), ProcessError> {
        Ok(self.child.start_kill()?)
    }

    async fn wait(&mut self) -> Result<i32, ProcessError> {
        let status = self.child.wait().await?;
        Ok(TokioProcessRunner::convert_exit_status(status))
    }
}
