//! Output sink trait and implementations
//!
//! A sink is the consumer side of a run: the pump hands it every decoded
//! chunk tagged with the channel it came from. [`ChunkSink`] forwards chunks
//! untouched, [`LineSink`] reassembles them into lines first, and
//! [`OutputHandler`] picks one of the two at construction time.

use super::accumulator::LineAccumulator;
use super::types::{Channel, Granularity};
use crate::subprocess::ProcessError;
use encoding_rs::{Encoding, UTF_8};

/// Callback receiving one chunk or one line of output
pub type Handler = Box<dyn FnMut(&str) + Send>;

/// Consumer of chunks read from a child's output and error streams
pub trait OutputSink: Send {
    /// Consume one decoded chunk read from `channel`
    fn on_chunk(&mut self, channel: Channel, data: &str);

    /// Called once when `channel` reaches end of stream
    fn on_close(&mut self, _channel: Channel) {}

    /// Encoding used to decode the child's bytes
    fn encoding(&self) -> &'static Encoding {
        UTF_8
    }
}

#[derive(Default)]
struct Handlers {
    output: Option<Handler>,
    error: Option<Handler>,
}

impl Handlers {
    fn get_mut(&mut self, channel: Channel) -> Option<&mut Handler> {
        match channel {
            Channel::Output => self.output.as_mut(),
            Channel::Error => self.error.as_mut(),
        }
    }
}

/// Sink delivering raw, undelimited chunks
pub struct ChunkSink {
    handlers: Handlers,
    encoding: &'static Encoding,
}

impl ChunkSink {
    /// Create a chunk sink with no handlers; output is discarded
    pub fn new() -> Self {
        Self {
            handlers: Handlers::default(),
            encoding: UTF_8,
        }
    }

    /// Set the handler for standard output chunks
    pub fn on_standard_output(mut self, handler: impl FnMut(&str) + Send + 'static) -> Self {
        self.handlers.output = Some(Box::new(handler));
        self
    }

    /// Set the handler for standard error chunks
    pub fn on_standard_error(mut self, handler: impl FnMut(&str) + Send + 'static) -> Self {
        self.handlers.error = Some(Box::new(handler));
        self
    }

    /// Set the encoding used to decode the child's output
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

impl Default for ChunkSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for ChunkSink {
    fn on_chunk(&mut self, channel: Channel, data: &str) {
        if let Some(handler) = self.handlers.get_mut(channel) {
            handler(data);
        }
    }

    fn encoding(&self) -> &'static Encoding {
        self.encoding
    }
}

/// Sink delivering complete lines, terminator stripped
///
/// Each channel has its own [`LineAccumulator`], so a partial line on one
/// channel never affects the other.
pub struct LineSink {
    handlers: Handlers,
    encoding: &'static Encoding,
    output_lines: LineAccumulator,
    error_lines: LineAccumulator,
    flush_partial_lines: bool,
}

impl LineSink {
    /// Create a line sink with no handlers; output is discarded
    pub fn new() -> Self {
        Self {
            handlers: Handlers::default(),
            encoding: UTF_8,
            output_lines: LineAccumulator::new(),
            error_lines: LineAccumulator::new(),
            flush_partial_lines: false,
        }
    }

    /// Set the handler for standard output lines
    pub fn on_standard_output(mut self, handler: impl FnMut(&str) + Send + 'static) -> Self {
        self.handlers.output = Some(Box::new(handler));
        self
    }

    /// Set the handler for standard error lines
    pub fn on_standard_error(mut self, handler: impl FnMut(&str) + Send + 'static) -> Self {
        self.handlers.error = Some(Box::new(handler));
        self
    }

    /// Set the encoding used to decode the child's output
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Emit an unterminated final line when its channel closes.
    ///
    /// Off by default: a last line without a terminator is dropped.
    pub fn flush_partial_lines(mut self, enabled: bool) -> Self {
        self.flush_partial_lines = enabled;
        self
    }

    /// The partial line currently buffered for `channel`
    pub fn pending(&self, channel: Channel) -> &str {
        match channel {
            Channel::Output => self.output_lines.pending(),
            Channel::Error => self.error_lines.pending(),
        }
    }

    fn split_mut(&mut self, channel: Channel) -> (&mut LineAccumulator, Option<&mut Handler>) {
        match channel {
            Channel::Output => (&mut self.output_lines, self.handlers.output.as_mut()),
            Channel::Error => (&mut self.error_lines, self.handlers.error.as_mut()),
        }
    }
}

impl Default for LineSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for LineSink {
    fn on_chunk(&mut self, channel: Channel, data: &str) {
        let (lines, handler) = self.split_mut(channel);
        let completed = lines.append(data);
        if let Some(handler) = handler {
            for line in &completed {
                handler(line.as_str());
            }
        }
    }

    fn on_close(&mut self, channel: Channel) {
        if !self.flush_partial_lines {
            return;
        }
        let (lines, handler) = self.split_mut(channel);
        if let (Some(tail), Some(handler)) = (lines.flush(), handler) {
            handler(&tail);
        }
    }

    fn encoding(&self) -> &'static Encoding {
        self.encoding
    }
}

/// Output handler configuration accepted by the `execute` family.
///
/// ```no_run
/// use run_command::OutputHandler;
///
/// let handler = OutputHandler::lines()
///     .on_standard_output(|line| println!("out: {line}"))
///     .on_standard_error(|line| eprintln!("err: {line}"));
/// let code = run_command::execute_with("ls -la", handler)?;
/// # Ok::<(), run_command::ProcessError>(())
/// ```
pub enum OutputHandler {
    /// Raw chunks, as read
    Chunks(ChunkSink),
    /// Complete lines, terminator stripped
    Lines(LineSink),
}

impl OutputHandler {
    /// Handler receiving raw chunks
    pub fn chunks() -> Self {
        Self::Chunks(ChunkSink::new())
    }

    /// Handler receiving complete lines
    pub fn lines() -> Self {
        Self::Lines(LineSink::new())
    }

    /// Set the handler for standard output
    pub fn on_standard_output(self, handler: impl FnMut(&str) + Send + 'static) -> Self {
        match self {
            Self::Chunks(sink) => Self::Chunks(sink.on_standard_output(handler)),
            Self::Lines(sink) => Self::Lines(sink.on_standard_output(handler)),
        }
    }

    /// Set the handler for standard error
    pub fn on_standard_error(self, handler: impl FnMut(&str) + Send + 'static) -> Self {
        match self {
            Self::Chunks(sink) => Self::Chunks(sink.on_standard_error(handler)),
            Self::Lines(sink) => Self::Lines(sink.on_standard_error(handler)),
        }
    }

    /// Set the encoding used to decode the child's output
    pub fn with_encoding(self, encoding: &'static Encoding) -> Self {
        match self {
            Self::Chunks(sink) => Self::Chunks(sink.with_encoding(encoding)),
            Self::Lines(sink) => Self::Lines(sink.with_encoding(encoding)),
        }
    }

    /// Set the encoding from a WHATWG label such as `"utf-8"` or `"latin1"`
    pub fn with_encoding_label(self, label: &str) -> Result<Self, ProcessError> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| ProcessError::UnsupportedEncoding(label.to_string()))?;
        Ok(self.with_encoding(encoding))
    }

    /// Emit unterminated final lines at end of stream; no effect on chunk handlers
    pub fn flush_partial_lines(self, enabled: bool) -> Self {
        match self {
            Self::Lines(sink) => Self::Lines(sink.flush_partial_lines(enabled)),
            chunks => chunks,
        }
    }

    /// Whether this handler receives chunks or lines
    pub fn granularity(&self) -> Granularity {
        match self {
            Self::Chunks(_) => Granularity::Chunks,
            Self::Lines(_) => Granularity::Lines,
        }
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::chunks()
    }
}

impl From<ChunkSink> for OutputHandler {
    fn from(sink: ChunkSink) -> Self {
        Self::Chunks(sink)
    }
}

impl From<LineSink> for OutputHandler {
    fn from(sink: LineSink) -> Self {
        Self::Lines(sink)
    }
}

impl OutputSink for OutputHandler {
    fn on_chunk(&mut self, channel: Channel, data: &str) {
        match self {
            Self::Chunks(sink) => sink.on_chunk(channel, data),
            Self::Lines(sink) => sink.on_chunk(channel, data),
        }
    }

    fn on_close(&mut self, channel: Channel) {
        match self {
            Self::Chunks(sink) => sink.on_close(channel),
            Self::Lines(sink) => sink.on_close(channel),
        }
    }

    fn encoding(&self) -> &'static Encoding {
        match self {
            Self::Chunks(sink) => sink.encoding(),
            Self::Lines(sink) => sink.encoding(),
        }
    }
}
