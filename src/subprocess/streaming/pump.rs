//! Concurrent draining of a child's output and error streams
//!
//! [`DualStreamPump`] keeps one read in flight per open channel and races
//! them against the process exit inside a single `tokio::select!`. Whichever
//! completes first is handled, so a silent channel never holds back data
//! arriving on the other one. Reads continue after exit until both channels
//! reach end of stream, which picks up anything the child flushed on its way
//! out.

use super::sink::OutputSink;
use super::types::{BufferConfig, Channel};
use crate::subprocess::runner::{BoxedReader, ChildProcess};
use crate::subprocess::ProcessError;
use encoding_rs::{CoderResult, Decoder, Encoding};
use tokio::io::AsyncReadExt;

/// Reader, decoder and read buffer for one channel
struct ChannelReader {
    channel: Channel,
    reader: Option<BoxedReader>,
    decoder: Decoder,
    buffer: Vec<u8>,
}

impl ChannelReader {
    fn new(
        channel: Channel,
        reader: Option<BoxedReader>,
        encoding: &'static Encoding,
        read_size: usize,
    ) -> Self {
        Self {
            channel,
            reader,
            decoder: encoding.new_decoder(),
            buffer: vec![0; read_size],
        }
    }

    fn is_live(&self) -> bool {
        self.reader.is_some()
    }

    /// One bounded read. Cancel safe: dropping it before completion reads nothing.
    async fn read(&mut self) -> std::io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(&mut self.buffer).await,
            None => Ok(0),
        }
    }

    /// Decode the first `n` bytes of the buffer. Zero bytes closes the channel
    /// and flushes whatever the decoder still holds.
    fn decode(&mut self, n: usize) -> Option<String> {
        let last = n == 0;
        if last {
            self.reader = None;
        }

        let mut src = &self.buffer[..n];
        let mut text =
            String::with_capacity(self.decoder.max_utf8_buffer_length(n).unwrap_or(n));
        loop {
            let (result, read, _had_errors) = self.decoder.decode_to_string(src, &mut text, last);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => text.reserve(src.len().saturating_mul(3).max(16)),
            }
        }

        (!text.is_empty()).then_some(text)
    }

    /// Hand a completed read to the sink
    fn forward(&mut self, n: usize, sink: &mut dyn OutputSink) {
        if let Some(text) = self.decode(n) {
            tracing::trace!("Forwarding {} bytes from {}", text.len(), self.channel);
            sink.on_chunk(self.channel, &text);
        }
        if n == 0 {
            tracing::trace!("{} reached end of stream", self.channel);
            sink.on_close(self.channel);
        }
    }
}

/// Drains a child's stdout and stderr concurrently into an [`OutputSink`]
pub struct DualStreamPump {
    output: ChannelReader,
    error: ChannelReader,
}

impl DualStreamPump {
    /// Create a pump over the two streams. A missing stream counts as
    /// already closed.
    pub fn new(
        stdout: Option<BoxedReader>,
        stderr: Option<BoxedReader>,
        encoding: &'static Encoding,
        config: &BufferConfig,
    ) -> Self {
        let read_size = config.effective_read_size();
        Self {
            output: ChannelReader::new(Channel::Output, stdout, encoding, read_size),
            error: ChannelReader::new(Channel::Error, stderr, encoding, read_size),
        }
    }

    /// Run until both streams are drained and the process has exited.
    ///
    /// Returns the exit code. Chunks reach the sink in read order within each
    /// channel; there is no ordering between the two channels.
    ///
    /// If a read or the exit wait fails, the child is killed and reaped
    /// before the error is returned.
    pub async fn run(
        self,
        process: &mut dyn ChildProcess,
        sink: &mut dyn OutputSink,
    ) -> Result<i32, ProcessError> {
        match self.drain(&mut *process, sink).await {
            Ok(code) => Ok(code),
            Err(e) => {
                tracing::debug!("Streaming failed: {}", e);
                reap(process).await;
                Err(e)
            }
        }
    }

    async fn drain(
        mut self,
        process: &mut dyn ChildProcess,
        sink: &mut dyn OutputSink,
    ) -> Result<i32, ProcessError> {
        let mut exit_code = None;

        while self.output.is_live() || self.error.is_live() {
            tokio::select! {
                read = self.output.read(), if self.output.is_live() => {
                    let n = read?;
                    self.output.forward(n, sink);
                }
                read = self.error.read(), if self.error.is_live() => {
                    let n = read?;
                    self.error.forward(n, sink);
                }
                status = process.wait(), if exit_code.is_none() => {
                    let code = status?;
                    tracing::trace!("Process exited with code {}, draining remaining output", code);
                    exit_code = Some(code);
                }
            }
        }

        match exit_code {
            Some(code) => Ok(code),
            None => match process.try_wait()? {
                Some(code) => Ok(code),
                None => {
                    tracing::trace!("Output streams closed, waiting for process exit");
                    process.wait().await
                }
            },
        }
    }
}

/// Kill and wait for a child abandoned after an error
async fn reap(process: &mut dyn ChildProcess) {
    match process.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => tracing::debug!("Failed to poll child before kill: {}", e),
    }

    if let Err(e) = process.start_kill() {
        tracing::warn!("Failed to kill child after error: {}", e);
    }
    if let Err(e) = process.wait().await {
        tracing::warn!("Failed to reap child after error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::mock::MockProcess;
    use crate::subprocess::streaming::sink::{ChunkSink, LineSink};
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type EventLog = Arc<Mutex<Vec<(Channel, String)>>>;

    fn recording_chunks() -> (EventLog, ChunkSink) {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&log);
        let err = Arc::clone(&log);
        let sink = ChunkSink::new()
            .on_standard_output(move |c| out.lock().unwrap().push((Channel::Output, c.to_string())))
            .on_standard_error(move |c| err.lock().unwrap().push((Channel::Error, c.to_string())));
        (log, sink)
    }

    fn joined(log: &EventLog, channel: Channel) -> String {
        log.lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, s)| s.as_str())
            .collect()
    }

    async fn pump(
        mut process: MockProcess,
        sink: &mut dyn OutputSink,
        config: BufferConfig,
    ) -> Result<i32, ProcessError> {
        let stdout = process.take_stdout();
        let stderr = process.take_stderr();
        let encoding = sink.encoding();
        DualStreamPump::new(stdout, stderr, encoding, &config)
            .run(&mut process, sink)
            .await
    }

    #[tokio::test]
    async fn test_delivers_both_streams_completely() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"hel")
            .read(b"lo\nwor")
            .read(b"ld\n")
            .build();
        let stderr = tokio_test::io::Builder::new()
            .read(b"warn")
            .read(b"ing\n")
            .build();
        let process = MockProcess::new(3)
            .with_stdout_reader(stdout)
            .with_stderr_reader(stderr);

        let (log, mut sink) = recording_chunks();
        let code = pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(code, 3);
        assert_eq!(joined(&log, Channel::Output), "hello\nworld\n");
        assert_eq!(joined(&log, Channel::Error), "warning\n");
    }

    #[tokio::test]
    async fn test_chunks_within_a_channel_keep_read_order() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"1")
            .read(b"2")
            .read(b"3")
            .build();
        let process = MockProcess::new(0).with_stdout_reader(stdout);

        let (log, mut sink) = recording_chunks();
        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        let chunks: Vec<String> = log.lock().unwrap().iter().map(|(_, s)| s.clone()).collect();
        assert_eq!(chunks, vec!["1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_channel_does_not_block_the_other() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"first\n")
            .read(b"second\n")
            .build();
        let stderr = tokio_test::io::Builder::new()
            .wait(Duration::from_secs(5))
            .read(b"late\n")
            .build();
        let process = MockProcess::new(0)
            .with_stdout_reader(stdout)
            .with_stderr_reader(stderr)
            .exit_after(Duration::from_secs(10));

        // Stamp stdout chunks with their arrival time on the paused clock
        let start = tokio::time::Instant::now();
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let stamped = Arc::clone(&arrivals);
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&log);
        let err = Arc::clone(&log);
        let mut sink = ChunkSink::new()
            .on_standard_output(move |c| {
                stamped.lock().unwrap().push(start.elapsed());
                out.lock().unwrap().push((Channel::Output, c.to_string()));
            })
            .on_standard_error(move |c| err.lock().unwrap().push((Channel::Error, c.to_string())));

        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(joined(&log, Channel::Output), "first\nsecond\n");
        assert_eq!(joined(&log, Channel::Error), "late\n");

        let arrivals = arrivals.lock().unwrap();
        assert_eq!(arrivals.len(), 2);
        assert!(arrivals.iter().all(|at| *at < Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_zero_output_process_completes() {
        let (log, mut sink) = recording_chunks();
        let code = pump(MockProcess::new(0), &mut sink, BufferConfig::default())
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_exit_after_streams_close() {
        let process = MockProcess::new(7)
            .with_stdout("done\n")
            .exit_after(Duration::from_secs(30));

        let (log, mut sink) = recording_chunks();
        let started = tokio::time::Instant::now();
        let code = pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(code, 7);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(joined(&log, Channel::Output), "done\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_output_written_around_exit() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"before exit\n")
            .wait(Duration::from_secs(2))
            .read(b"flushed at exit\n")
            .build();
        let process = MockProcess::new(0)
            .with_stdout_reader(stdout)
            .exit_after(Duration::from_secs(1));

        let (log, mut sink) = recording_chunks();
        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(
            joined(&log, Channel::Output),
            "before exit\nflushed at exit\n"
        );
    }

    #[tokio::test]
    async fn test_small_read_buffer_splits_chunks() {
        let process = MockProcess::new(0).with_stdout("abcdefghij");

        let (log, mut sink) = recording_chunks();
        pump(process, &mut sink, BufferConfig::with_read_buffer_size(4))
            .await
            .unwrap();

        let chunks: Vec<String> = log.lock().unwrap().iter().map(|(_, s)| s.clone()).collect();
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[tokio::test]
    async fn test_multibyte_sequence_split_across_reads() {
        // "héllo ✓" with both multi-byte characters cut between reads
        let stdout = tokio_test::io::Builder::new()
            .read(b"h\xC3")
            .read(b"\xA9llo \xE2\x9C")
            .read(b"\x93\n")
            .build();
        let process = MockProcess::new(0).with_stdout_reader(stdout);

        let (log, mut sink) = recording_chunks();
        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(joined(&log, Channel::Output), "héllo ✓\n");
        assert!(!joined(&log, Channel::Output).contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_malformed_bytes_are_replaced() {
        let process = MockProcess::new(0).with_stdout(&b"ok\xFF\n"[..]);

        let (log, mut sink) = recording_chunks();
        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(joined(&log, Channel::Output), "ok\u{FFFD}\n");
    }

    #[tokio::test]
    async fn test_truncated_sequence_at_end_of_stream_is_replaced() {
        let process = MockProcess::new(0).with_stdout(&b"end\xE2\x9C"[..]);

        let (log, mut sink) = recording_chunks();
        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(joined(&log, Channel::Output), "end\u{FFFD}");
    }

    #[tokio::test]
    async fn test_decodes_with_configured_encoding() {
        // "café" in windows-1252
        let process = MockProcess::new(0).with_stdout(&b"caf\xE9\n"[..]);

        let (log, sink) = recording_chunks();
        let mut sink = sink.with_encoding(encoding_rs::WINDOWS_1252);
        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(joined(&log, Channel::Output), "café\n");
    }

    #[tokio::test]
    async fn test_line_sink_reassembles_across_reads() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"Line1\nLi")
            .read(b"ne2\r")
            .read(b"\nLine3\nIncomplete")
            .build();
        let process = MockProcess::new(0).with_stdout_reader(stdout);

        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = Arc::clone(&lines);
        let mut sink = LineSink::new()
            .on_standard_output(move |l| collected.lock().unwrap().push(l.to_string()));
        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        assert_eq!(*lines.lock().unwrap(), vec!["Line1", "Line2", "Line3"]);
    }

    #[tokio::test]
    async fn test_read_error_aborts_run() {
        let stdout = tokio_test::io::Builder::new()
            .read(b"partial")
            .read_error(std::io::Error::other("pipe broke"))
            .build();
        let process = MockProcess::new(0).with_stdout_reader(stdout);

        let (_log, mut sink) = recording_chunks();
        let result = pump(process, &mut sink, BufferConfig::default()).await;

        assert!(matches!(result, Err(ProcessError::Io(e)) if e.to_string() == "pipe broke"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_kills_running_child() {
        let stdout = tokio_test::io::Builder::new()
            .read_error(std::io::Error::other("pipe broke"))
            .build();
        let process = MockProcess::new(0)
            .with_stdout_reader(stdout)
            .exit_after(Duration::from_secs(3600));
        let killed = process.kill_flag();

        let start = tokio::time::Instant::now();
        let (_log, mut sink) = recording_chunks();
        let result = pump(process, &mut sink, BufferConfig::default()).await;

        assert!(matches!(result, Err(ProcessError::Io(_))));
        assert!(killed.load(Ordering::SeqCst));
        assert!(start.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_read_error_after_exit_skips_kill() {
        let stdout = tokio_test::io::Builder::new()
            .read_error(std::io::Error::other("pipe broke"))
            .build();
        let process = MockProcess::new(3).with_stdout_reader(stdout);
        let killed = process.kill_flag();

        let (_log, mut sink) = recording_chunks();
        let result = pump(process, &mut sink, BufferConfig::default()).await;

        assert!(result.is_err());
        assert!(!killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_notification_once_per_channel() {
        struct CloseCounter(Vec<Channel>);
        impl OutputSink for CloseCounter {
            fn on_chunk(&mut self, _channel: Channel, _data: &str) {}
            fn on_close(&mut self, channel: Channel) {
                self.0.push(channel);
            }
        }

        let process = MockProcess::new(0).with_stdout("x").with_stderr("y");
        let mut sink = CloseCounter(Vec::new());
        pump(process, &mut sink, BufferConfig::default()).await.unwrap();

        sink.0.sort_by_key(|c| *c == Channel::Error);
        assert_eq!(sink.0, vec![Channel::Output, Channel::Error]);
    }
}
