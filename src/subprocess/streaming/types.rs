//! Core types for streaming infrastructure

use std::fmt;

/// Default size of a single read from a child stream, in bytes
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Stream channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The child's standard output
    Output,
    /// The child's standard error
    Error,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Output => f.write_str("stdout"),
            Channel::Error => f.write_str("stderr"),
        }
    }
}

/// Granularity at which a sink delivers output to its handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// Raw, undelimited chunks as they were read (default)
    #[default]
    Chunks,
    /// Complete lines with the terminator stripped
    Lines,
}

/// Buffer configuration for streaming
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Upper bound on the bytes taken by one read from a channel
    pub read_buffer_size: usize,
}

impl BufferConfig {
    /// Create a buffer configuration with the given read size
    pub fn with_read_buffer_size(read_buffer_size: usize) -> Self {
        Self { read_buffer_size }
    }

    /// Read size actually used; a zero-sized read would look like end of stream
    pub(crate) fn effective_read_size(&self) -> usize {
        self.read_buffer_size.max(1)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}
