//! Streaming tests against real child processes

use crate::subprocess::streaming::{BufferConfig, ChunkSink, LineSink, OutputHandler};
use crate::subprocess::{CommandRunner, ProcessCommand, ProcessCommandBuilder};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

fn shell(script: &str) -> ProcessCommand {
    ProcessCommandBuilder::new("sh").arg("-c").arg(script).build()
}

fn recorder() -> (Log, impl FnMut(&str) + Send + 'static) {
    let log = Log::default();
    let sink = Arc::clone(&log);
    (log, move |text: &str| {
        sink.lock().unwrap().push(text.to_string())
    })
}

/// Line sink recording each channel separately
fn recording_lines() -> (Log, Log, LineSink) {
    let (output, on_output) = recorder();
    let (error, on_error) = recorder();
    let sink = LineSink::new()
        .on_standard_output(on_output)
        .on_standard_error(on_error);
    (output, error, sink)
}

fn lines(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn numbered(count: usize) -> Vec<String> {
    (1..=count).map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn test_streaming_basic_echo() {
    let (output, error, sink) = recording_lines();

    let code = CommandRunner::production()
        .execute_with("echo hello world", sink)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(lines(&output), vec!["hello world"]);
    assert!(lines(&error).is_empty());
}

#[tokio::test]
async fn test_streaming_multiline_output() {
    let (output, _, sink) = recording_lines();

    let code = CommandRunner::production()
        .run(shell("echo line1; echo line2; echo line3"), sink)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(lines(&output), vec!["line1", "line2", "line3"]);
}

#[tokio::test]
async fn test_streaming_separates_channels() {
    let (output, error, sink) = recording_lines();

    let code = CommandRunner::production()
        .run(
            shell("echo out1; echo err1 >&2; echo out2; echo err2 >&2"),
            sink,
        )
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(lines(&output), vec!["out1", "out2"]);
    assert_eq!(lines(&error), vec!["err1", "err2"]);
}

#[tokio::test]
async fn test_large_output_with_silent_stderr() {
    let (output, error, sink) = recording_lines();

    let code = CommandRunner::production()
        .execute_with("seq 1 20000", sink)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(lines(&output), numbered(20000));
    assert!(lines(&error).is_empty());
}

#[tokio::test]
async fn test_large_error_output_with_silent_stdout() {
    // More than a pipe buffer on stderr alone: a reader blocked on stdout
    // would deadlock here
    let (output, error, sink) = recording_lines();

    let code = CommandRunner::production()
        .run(shell("seq 1 20000 >&2"), sink)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert!(lines(&output).is_empty());
    assert_eq!(lines(&error), numbered(20000));
}

#[tokio::test]
async fn test_chunks_deliver_every_byte_once() {
    let (output, on_output) = recorder();
    let (error, on_error) = recorder();
    let sink = ChunkSink::new()
        .on_standard_output(on_output)
        .on_standard_error(on_error);

    let code = CommandRunner::production()
        .run(shell("seq 1 10000; seq 1 10000 >&2"), sink)
        .await
        .unwrap();

    let mut expected = numbered(10000).join("\n");
    expected.push('\n');

    assert_eq!(code, 0);
    assert_eq!(output.lock().unwrap().concat(), expected);
    assert_eq!(error.lock().unwrap().concat(), expected);
}

#[tokio::test]
async fn test_exit_code_propagates_after_output() {
    let (output, _, sink) = recording_lines();

    let code = CommandRunner::production()
        .run(shell("echo partial; exit 3"), sink)
        .await
        .unwrap();

    assert_eq!(code, 3);
    assert_eq!(lines(&output), vec!["partial"]);
}

#[tokio::test]
async fn test_unterminated_line_dropped_by_default() {
    let (output, _, sink) = recording_lines();

    CommandRunner::production()
        .run(shell("printf 'a\\nb'"), sink)
        .await
        .unwrap();

    assert_eq!(lines(&output), vec!["a"]);
}

#[tokio::test]
async fn test_unterminated_line_flushed_when_enabled() {
    let (output, _, sink) = recording_lines();

    CommandRunner::production()
        .run(shell("printf 'a\\nb'"), sink.flush_partial_lines(true))
        .await
        .unwrap();

    assert_eq!(lines(&output), vec!["a", "b"]);
}

#[tokio::test]
async fn test_crlf_output_yields_clean_lines() {
    let (output, _, sink) = recording_lines();

    CommandRunner::production()
        .run(shell("printf 'one\\r\\ntwo\\r\\n'"), sink)
        .await
        .unwrap();

    assert_eq!(lines(&output), vec!["one", "two"]);
}

#[tokio::test]
async fn test_single_byte_reads_keep_characters_intact() {
    let (output, _, sink) = recording_lines();

    let code = CommandRunner::production()
        .with_buffer_config(BufferConfig::with_read_buffer_size(1))
        .execute_with("echo héllo ✓", sink)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(lines(&output), vec!["héllo ✓"]);
}

#[tokio::test]
async fn test_legacy_encoding_is_decoded() {
    let (output, on_output) = recorder();
    let handler = OutputHandler::lines()
        .on_standard_output(on_output)
        .with_encoding_label("latin1")
        .unwrap();

    // \351 is 'é' in ISO-8859-1
    CommandRunner::production()
        .run(shell("printf '\\351t\\351\\n'"), handler)
        .await
        .unwrap();

    assert_eq!(lines(&output), vec!["été"]);
}

#[tokio::test]
async fn test_handler_only_for_errors() {
    let (error, on_error) = recorder();
    let handler = OutputHandler::lines().on_standard_error(on_error);

    let code = CommandRunner::production()
        .run(shell("echo ignored; echo reported >&2; exit 1"), handler)
        .await
        .unwrap();

    assert_eq!(code, 1);
    assert_eq!(lines(&error), vec!["reported"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_signal_exit_code() {
    let code = CommandRunner::production()
        .run(shell("kill -9 $$"), OutputHandler::default())
        .await
        .unwrap();

    assert_eq!(code, 137);
}
