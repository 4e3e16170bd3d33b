//! # run-command
//!
//! Run an external command and receive its standard output and standard
//! error while it runs, either as raw chunks or as complete lines, then get
//! its exit code.
//!
//! ## Usage
//!
//! ```no_run
//! use run_command::OutputHandler;
//!
//! let handler = OutputHandler::lines()
//!     .on_standard_output(|line| println!("out: {line}"))
//!     .on_standard_error(|line| eprintln!("err: {line}"));
//!
//! let code = run_command::execute_with("ls -la", handler)?;
//! # Ok::<(), run_command::ProcessError>(())
//! ```
//!
//! ## Modules
//!
//! - `subprocess` - Process launching, concurrent stream draining and output sinks
//! - `app` - Configuration, logging and error reporting for the binary
pub mod app;
pub mod subprocess;

pub use subprocess::{
    execute, execute_async, execute_async_with, execute_with, BufferConfig, Channel, ChunkSink,
    CommandRunner, DualStreamPump, Execution, Granularity, LineAccumulator, LineSink,
    OutputHandler, OutputSink, ProcessCommand, ProcessCommandBuilder, ProcessError, ProcessRunner,
};
