pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;
pub mod streaming;


pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcess, MockProcessRunner};
pub use runner::{BoxedReader, ChildProcess, ProcessCommand, ProcessRunner, TokioProcessRunner};
pub use streaming::{
    BufferConfig, Channel, ChunkSink, DualStreamPump, Granularity, LineAccumulator, LineSink,
    OutputHandler, OutputSink,
};

use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A started command: resolves to the exit code once both output streams
/// are drained and the process has exited.
pub type Execution = BoxFuture<'static, Result<i32, ProcessError>>;

/// Runs command lines through a [`ProcessRunner`], streaming their output
/// into a sink.
#[derive(Clone)]
pub struct CommandRunner {
    runner: Arc<dyn ProcessRunner>,
    buffer_config: BufferConfig,
}

impl CommandRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            buffer_config: BufferConfig::default(),
        }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    #[cfg(test)]
    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn with_buffer_config(mut self, buffer_config: BufferConfig) -> Self {
        self.buffer_config = buffer_config;
        self
    }

    /// Run a command line, discarding its output
    pub async fn execute(&self, command_line: &str) -> Result<i32, ProcessError> {
        self.execute_with(command_line, OutputHandler::default())
            .await
    }

    /// Run a command line, delivering its output to `sink`
    pub async fn execute_with(
        &self,
        command_line: &str,
        sink: impl OutputSink + 'static,
    ) -> Result<i32, ProcessError> {
        self.execute_async_with(command_line, sink)?.await
    }

    /// Parse a command line and return the execution without awaiting it,
    /// discarding its output
    pub fn execute_async(&self, command_line: &str) -> Result<Execution, ProcessError> {
        self.execute_async_with(command_line, OutputHandler::default())
    }

    /// Parse a command line and return the execution without awaiting it.
    ///
    /// A blank command line is rejected here, before anything is spawned.
    pub fn execute_async_with(
        &self,
        command_line: &str,
        sink: impl OutputSink + 'static,
    ) -> Result<Execution, ProcessError> {
        let command = ProcessCommand::parse(command_line)?;
        Ok(self.run(command, sink))
    }

    /// Spawn an already-built command and pump its output into `sink`
    pub fn run(&self, command: ProcessCommand, sink: impl OutputSink + 'static) -> Execution {
        let runner = Arc::clone(&self.runner);
        let buffer_config = self.buffer_config.clone();
        let mut sink = sink;

        async move {
            let start = Instant::now();
            let mut child = runner.spawn(&command).await?;

            let stdout = extract_stream(child.take_stdout(), Channel::Output)?;
            let stderr = extract_stream(child.take_stderr(), Channel::Error)?;

            let pump = DualStreamPump::new(
                Some(stdout),
                Some(stderr),
                sink.encoding(),
                &buffer_config,
            );
            let result = pump.run(child.as_mut(), &mut sink).await;

            log_result(&command, &result, start.elapsed());
            result
        }
        .boxed()
    }
}

fn extract_stream(
    stream: Option<BoxedReader>,
    channel: Channel,
) -> Result<BoxedReader, ProcessError> {
    stream.ok_or_else(|| ProcessError::InternalError {
        message: format!("Failed to capture {channel}"),
    })
}

fn log_result(command: &ProcessCommand, result: &Result<i32, ProcessError>, elapsed: Duration) {
    match result {
        Ok(code) => tracing::debug!(
            "Command '{}' exited with code {} after {:?}",
            command,
            code,
            elapsed
        ),
        Err(e) => tracing::debug!("Command '{}' failed after {:?}: {}", command, elapsed, e),
    }
}

/// Run a command line to completion, discarding its output.
///
/// Blocks the calling thread until the command exits. Safe to call from
/// inside an async context as well; see [`execute_with`].
pub fn execute(command_line: &str) -> Result<i32, ProcessError> {
    execute_with(command_line, OutputHandler::default())
}

/// Blocking form of [`CommandRunner::execute_with`] on the production runner.
///
/// Outside a tokio runtime the command runs on a private current-thread
/// runtime. Inside one, it runs on a dedicated thread with its own runtime,
/// since the caller's runtime cannot be blocked on.
pub fn execute_with(
    command_line: &str,
    sink: impl OutputSink + 'static,
) -> Result<i32, ProcessError> {
    let execution = execute_async_with(command_line, sink)?;
    block_on(execution)
}

/// [`CommandRunner::execute_async`] on the production runner
pub fn execute_async(command_line: &str) -> Result<Execution, ProcessError> {
    CommandRunner::production().execute_async(command_line)
}

/// [`CommandRunner::execute_async_with`] on the production runner
pub fn execute_async_with(
    command_line: &str,
    sink: impl OutputSink + 'static,
) -> Result<Execution, ProcessError> {
    CommandRunner::production().execute_async_with(command_line, sink)
}

fn block_on(execution: Execution) -> Result<i32, ProcessError> {
    if tokio::runtime::Handle::try_current().is_err() {
        return run_to_completion(execution);
    }

    tracing::trace!("Blocking execute called inside a runtime, using a dedicated thread");
    std::thread::scope(|scope| {
        scope
            .spawn(|| run_to_completion(execution))
            .join()
            .unwrap_or_else(|_| {
                Err(ProcessError::InternalError {
                    message: "Execution thread panicked".to_string(),
                })
            })
    })
}

fn run_to_completion(execution: Execution) -> Result<i32, ProcessError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execution)
}
