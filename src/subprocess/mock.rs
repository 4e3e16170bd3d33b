use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::Instant;

use super::error::ProcessError;
use super::runner::{BoxedReader, ChildProcess, ProcessCommand, ProcessRunner};

/// Exit code a killed mock reports, as for SIGKILL
const KILLED_EXIT_CODE: i32 = 137;

/// Scripted child process
///
/// Streams default to empty and the process counts as exited immediately
/// unless [`MockProcess::exit_after`] is used.
pub struct MockProcess {
    stdout: Option<BoxedReader>,
    stderr: Option<BoxedReader>,
    exit_code: i32,
    exit_at: Option<Instant>,
    killed: Arc<AtomicBool>,
}

impl MockProcess {
    pub fn new(exit_code: i32) -> Self {
        Self {
            stdout: Some(Box::pin(std::io::Cursor::new(Vec::new()))),
            stderr: Some(Box::pin(std::io::Cursor::new(Vec::new()))),
            exit_code,
            exit_at: None,
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_stdout(self, data: impl Into<Vec<u8>>) -> Self {
        self.with_stdout_reader(std::io::Cursor::new(data.into()))
    }

    pub fn with_stderr(self, data: impl Into<Vec<u8>>) -> Self {
        self.with_stderr_reader(std::io::Cursor::new(data.into()))
    }

    pub fn with_stdout_reader(mut self, reader: impl AsyncRead + Send + 'static) -> Self {
        self.stdout = Some(Box::pin(reader));
        self
    }

    pub fn with_stderr_reader(mut self, reader: impl AsyncRead + Send + 'static) -> Self {
        self.stderr = Some(Box::pin(reader));
        self
    }

    /// Report exit only once `delay` has elapsed from now
    pub fn exit_after(mut self, delay: Duration) -> Self {
        self.exit_at = Some(Instant::now() + delay);
        self
    }

    /// Shared flag set once the process is killed
    pub fn kill_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.killed)
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    fn has_exited(&self) -> bool {
        self.exit_at.map_or(true, |at| Instant::now() >= at)
    }
}

#[async_trait]
impl ChildProcess for MockProcess {
    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take()
    }

    fn try_wait(&mut self) -> Result<Option<i32>, ProcessError> {
        if self.is_killed() {
            return Ok(Some(KILLED_EXIT_CODE));
        }
        Ok(self.has_exited().then_some(self.exit_code))
    }

    fn start_kill(&mut self) -> Result<(), ProcessError> {
        if !self.has_exited() {
            self.killed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<i32, ProcessError> {
        if self.is_killed() {
            return Ok(KILLED_EXIT_CODE);
        }
        if let Some(at) = self.exit_at {
            tokio::time::sleep_until(at).await;
        }
        Ok(self.exit_code)
    }
}

#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
}

struct MockExpectation {
    program: String,
    #[allow(clippy::type_complexity)]
    args_matcher: Option<Box<dyn Fn(&[String]) -> bool + Send + Sync>>,
    response: MockResponse,
    times_called: usize,
    expected_times: Option<usize>,
}

#[derive(Clone)]
struct MockResponse {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: i32,
    exit_delay: Option<Duration>,
    not_found: bool,
}

impl MockResponse {
    fn to_process(&self) -> MockProcess {
        let process = MockProcess::new(self.exit_code)
            .with_stdout(self.stdout.clone())
            .with_stderr(self.stderr.clone());
        match self.exit_delay {
            Some(delay) => process.exit_after(delay),
            None => process,
        }
    }
}

pub struct MockCommandConfig {
    runner: MockProcessRunner,
    expectation: MockExpectation,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn expect_command(&mut self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                response: MockResponse {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    exit_code: 0,
                    exit_delay: None,
                    not_found: false,
                },
                times_called: 0,
                expected_times: None,
            },
        }
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = self.call_history.lock().unwrap();
        let count = history.iter().filter(|cmd| cmd.program == program).count();
        count == times
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn reset(&mut self) {
        self.expectations.lock().unwrap().clear();
        self.call_history.lock().unwrap().clear();
    }

    fn respond(&self, command: &ProcessCommand) -> Result<MockResponse, ProcessError> {
        self.call_history.lock().unwrap().push(command.clone());

        let mut expectations = self.expectations.lock().unwrap();

        for expectation in expectations.iter_mut() {
            if expectation.program != command.program {
                continue;
            }

            if let Some(ref args_matcher) = expectation.args_matcher {
                if !(args_matcher)(&command.args) {
                    continue;
                }
            }

            expectation.times_called += 1;

            if let Some(expected) = expectation.expected_times {
                if expectation.times_called > expected {
                    return Err(ProcessError::MockExpectationNotMet(format!(
                        "Command '{}' called {} times, expected {}",
                        command.program, expectation.times_called, expected
                    )));
                }
            }

            return Ok(expectation.response.clone());
        }

        Err(ProcessError::MockExpectationNotMet(format!(
            "No expectation found for command: {} {:?}",
            command.program, command.args
        )))
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn spawn(&self, command: &ProcessCommand) -> Result<Box<dyn ChildProcess>, ProcessError> {
        let response = self.respond(command)?;
        if response.not_found {
            return Err(ProcessError::CommandNotFound(command.program.clone()));
        }
        Ok(Box::new(response.to_process()))
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation.response.stdout = stdout.as_bytes().to_vec();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.expectation.response.stderr = stderr.as_bytes().to_vec();
        self
    }

    pub fn returns_bytes(mut self, stdout: &[u8]) -> Self {
        self.expectation.response.stdout = stdout.to_vec();
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        self.expectation.response.exit_code = code;
        self
    }

    pub fn returns_success(self) -> Self {
        self.returns_exit_code(0)
    }

    /// Exit only after `delay`, measured from when the process is spawned
    pub fn exits_after(mut self, delay: Duration) -> Self {
        self.expectation.response.exit_delay = Some(delay);
        self
    }

    /// Fail the spawn as if the executable did not exist
    pub fn not_found(mut self) -> Self {
        self.expectation.response.not_found = true;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        self.runner
            .expectations
            .lock()
            .unwrap()
            .push(self.expectation);
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}
