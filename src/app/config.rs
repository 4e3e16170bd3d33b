//! Application configuration
//!
//! This module handles the settings the binary derives from its arguments.

use crate::subprocess::{Granularity, OutputHandler};
use encoding_rs::{Encoding, UTF_8};

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Relay raw chunks or complete lines
    pub granularity: Granularity,
    /// Emit an unterminated last line when a stream closes
    pub flush_partial_lines: bool,
    /// Encoding of the child's output
    pub encoding: &'static Encoding,
}

impl AppConfig {
    /// Create a new application configuration
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    /// Deliver output line by line
    pub fn with_lines(mut self, flush_partial_lines: bool) -> Self {
        self.granularity = Granularity::Lines;
        self.flush_partial_lines = flush_partial_lines;
        self
    }

    /// Decode output with `encoding` instead of UTF-8
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Handler without callbacks, shaped by this configuration
    pub fn output_handler(&self) -> OutputHandler {
        let handler = match self.granularity {
            Granularity::Chunks => OutputHandler::chunks(),
            Granularity::Lines => OutputHandler::lines(),
        };
        handler
            .with_encoding(self.encoding)
            .flush_partial_lines(self.flush_partial_lines)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            granularity: Granularity::Chunks,
            flush_partial_lines: false,
            encoding: UTF_8,
        }
    }
}
