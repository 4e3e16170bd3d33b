//! Real-time streaming of subprocess output
//!
//! Bytes read from a child's stdout and stderr are decoded and handed to an
//! [`OutputSink`] as they arrive, either as raw chunks or reassembled into
//! lines.

pub mod accumulator;
pub mod pump;
pub mod sink;
pub mod types;

#[cfg(test)]
mod tests;

pub use accumulator::LineAccumulator;
pub use pump::DualStreamPump;
pub use sink::{ChunkSink, Handler, LineSink, OutputHandler, OutputSink};
pub use types::{BufferConfig, Channel, Granularity, DEFAULT_READ_BUFFER_SIZE};
