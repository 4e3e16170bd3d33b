//! Error handling utilities
//!
//! This module provides centralized error handling for the binary.

use crate::subprocess::ProcessError;
use tracing::error;

/// Conventional shell status for a command that could not be started
pub const LAUNCH_FAILURE: i32 = 127;
/// Invalid arguments or options
pub const ARGUMENT_ERROR: i32 = 2;
/// Anything else
pub const GENERAL_ERROR: i32 = 1;

/// Exit status for an error that ended the run
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ProcessError>())
    {
        Some(err) if err.is_launch_failure() => LAUNCH_FAILURE,
        Some(ProcessError::UnsupportedEncoding(_)) => ARGUMENT_ERROR,
        _ => GENERAL_ERROR,
    }
}

/// Handle fatal errors and exit with appropriate status code
///
/// # Verbose Mode Behavior
/// - `verbose = 0`: The top-level message only
/// - `verbose >= 1`: Includes the full error chain
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);

    eprintln!("Error: {error:#}");
    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code_for(&error))
}
