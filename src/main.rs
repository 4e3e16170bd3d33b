use anyhow::{Context, Result};
use clap::Parser;
use encoding_rs::Encoding;
use run_command::app::{handle_fatal_error, init_logging, AppConfig};
use run_command::{OutputHandler, ProcessError};
use std::io::Write;
use tracing::debug;

/// Run a command and relay its output as it arrives
#[derive(Parser)]
#[command(name = "run-command")]
#[command(about = "Run a command and stream its output as it arrives", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Relay complete lines instead of raw chunks
    #[arg(long)]
    lines: bool,

    /// Also relay a final line that has no terminator
    #[arg(long, requires = "lines")]
    flush: bool,

    /// Encoding of the command's output (e.g. "utf-8", "latin1", "shift_jis")
    #[arg(long, value_name = "LABEL", value_parser = parse_encoding)]
    encoding: Option<&'static Encoding>,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn parse_encoding(label: &str) -> std::result::Result<&'static Encoding, String> {
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| ProcessError::UnsupportedEncoding(label.to_string()).to_string())
}

impl Cli {
    fn config(&self) -> AppConfig {
        let mut config = AppConfig::new(self.verbose);
        if self.lines {
            config = config.with_lines(self.flush);
        }
        if let Some(encoding) = self.encoding {
            config = config.with_encoding(encoding);
        }
        config
    }
}

/// Write chunks untouched, or lines with a newline restored
fn relay<W: Write>(
    mut target: impl FnMut() -> W + Send + 'static,
    newline: bool,
) -> impl FnMut(&str) + Send + 'static {
    move |text: &str| {
        let mut out = target();
        // A closed relay target must not abort the child's run
        let _ = out.write_all(text.as_bytes());
        if newline {
            let _ = out.write_all(b"\n");
        }
        let _ = out.flush();
    }
}

fn build_handler(config: &AppConfig) -> OutputHandler {
    let newline = config.granularity == run_command::Granularity::Lines;
    config
        .output_handler()
        .on_standard_output(relay(std::io::stdout, newline))
        .on_standard_error(relay(std::io::stderr, newline))
}

fn run(command: &[String], config: &AppConfig) -> Result<i32> {
    let command_line = command.join(" ");
    debug!("Running '{}'", command_line);

    run_command::execute_with(&command_line, build_handler(config))
        .with_context(|| format!("Failed to run '{command_line}'"))
}

fn main() {
    let cli = Cli::parse();
    let config = cli.config();
    init_logging(&config);

    match run(&cli.command, &config) {
        Ok(code) => std::process::exit(code),
        Err(e) => handle_fatal_error(e, config.verbose),
    }
}
