//! Purpose: `tailmap` CLI entry point.
//! Role: Binary crate root; parses args, drives a `WindowedReader` as its consumer, emits output.
//! Invariants: `cat` writes raw file bytes to stdout; `scan` writes one JSON object.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `to_exit_code`.
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

use tailmap::core::error::{Error, ErrorKind, to_exit_code};
use tailmap::core::options::{TailPolicy, WindowOptions};
use tailmap::core::window::WindowedReader;

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `tailmap --help`."));
            }
        },
    };

    let options = WindowOptions::new(
        parse_window_size(&cli.window_size)?,
        parse_window_size(&cli.elasticity)?,
    )
    .with_tail_policy(cli.tail.into());
    options.validate()?;

    match cli.command {
        Command::Cat { path } => cat(&path, options)?,
        Command::Scan { path, chunk } => {
            let chunk = chunk.as_deref().map(parse_size).transpose()?;
            let summary = scan(&path, options, chunk)?;
            emit_json(&summary)?;
        }
    }
    Ok(0)
}

#[derive(Parser)]
#[command(
    name = "tailmap",
    version,
    about = "Read a growing file through a sliding memory-mapped window",
    long_about = None,
    after_help = r#"EXAMPLES
  $ tailmap cat /tmp/profile.hpl > copy.hpl
  $ tailmap --window-size 64M --elasticity 48M scan /tmp/profile.hpl
  $ tailmap --tail available scan --chunk 4K /tmp/profile.hpl"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "5M",
        help = "Bytes mapped per window (bytes or K/M/G)"
    )]
    window_size: String,
    #[arg(
        long,
        global = true,
        default_value = "4M",
        help = "Consumed bytes that trigger a remap; must be below the window size"
    )]
    elasticity: String,
    #[arg(
        long,
        global = true,
        default_value = "full",
        value_enum,
        help = "Map the full window past EOF, or only the bytes available"
    )]
    tail: TailArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TailArg {
    Full,
    Available,
}

impl From<TailArg> for TailPolicy {
    fn from(value: TailArg) -> Self {
        match value {
            TailArg::Full => TailPolicy::MapFull,
            TailArg::Available => TailPolicy::MapAvailable,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Copy the bytes written so far to stdout")]
    Cat {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
    },
    #[command(about = "Walk the file through the window and print a JSON summary")]
    Scan {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Consume at most this many bytes per step (bytes or K/M/G)")]
        chunk: Option<String>,
    },
}

fn cat(path: &Path, options: WindowOptions) -> Result<(), Error> {
    let mut reader = WindowedReader::open_with(path, options)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    loop {
        let mut written: io::Result<()> = Ok(());
        let consumed = reader.consume_with(|view| {
            let bytes = view.remaining();
            written = out.write_all(bytes);
            if written.is_ok() { bytes.len() } else { 0 }
        })?;
        written.map_err(stdout_error)?;
        if consumed == 0 {
            break;
        }
    }
    out.flush().map_err(stdout_error)?;
    reader.close();
    Ok(())
}

fn scan(path: &Path, options: WindowOptions, chunk: Option<u64>) -> Result<Value, Error> {
    let step = match chunk {
        Some(0) => {
            return Err(Error::new(ErrorKind::Usage).with_message("chunk must be greater than zero"));
        }
        Some(chunk) => usize::try_from(chunk).unwrap_or(usize::MAX),
        None => usize::MAX,
    };

    let mut reader = WindowedReader::open_with(path, options)?;
    let mut total: u64 = 0;
    loop {
        let consumed = reader.consume_with(|view| view.remaining().len().min(step))?;
        if consumed == 0 {
            break;
        }
        total += consumed as u64;
    }

    let summary = json!({
        "path": reader.path().display().to_string(),
        "options": options,
        "bytes": total,
        "remaps": reader.remap_count(),
        "base_offset": reader.base_offset(),
        "cursor": reader.cursor(),
    });
    reader.close();
    Ok(summary)
}

fn parse_size(input: &str) -> Result<u64, Error> {
    let trimmed = input.trim();
    let split = trimmed
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(idx, _)| idx)
        .unwrap_or(trimmed.len());
    let digits = trimmed[..split].trim();
    let suffix = trimmed[split..].trim();

    let value: u64 = digits.parse().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid size")
            .with_hint("Use bytes or K/M/G (e.g. 5M).")
            .with_source(err)
    })?;

    let multiplier = match suffix {
        "" => 1,
        "K" | "k" => 1024,
        "M" | "m" => 1024 * 1024,
        "G" | "g" => 1024 * 1024 * 1024,
        _ => {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("invalid size suffix")
                .with_hint("Use K/M/G (e.g. 5M)."));
        }
    };

    value
        .checked_mul(multiplier)
        .and_then(|size| usize::try_from(size).ok().map(|_| size))
        .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("size is too large"))
}

// `parse_size` already rejects values that do not fit in `usize`.
fn parse_window_size(input: &str) -> Result<usize, Error> {
    parse_size(input).map(|size| size as usize)
}

fn stdout_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write to stdout")
        .with_source(err)
}

fn emit_json(value: &Value) -> Result<(), Error> {
    let json = serde_json::to_string(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("json encode failed")
            .with_source(err)
    })?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{json}").map_err(stdout_error)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::SourceUnavailable => "source unavailable".to_string(),
        ErrorKind::InvalidAdvance => "invalid advance".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    if let Some(offset) = err.offset() {
        lines.push(format!("offset: {offset}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{error_json, error_text, parse_size, scan};
    use std::path::Path;
    use tailmap::core::error::{Error, ErrorKind};
    use tailmap::core::options::WindowOptions;

    #[test]
    fn parse_size_accepts_bytes_and_kmg() {
        assert_eq!(parse_size("42").unwrap(), 42);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("2k").unwrap(), 2048);
        assert_eq!(parse_size("5M").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_size_rejects_iec_suffixes() {
        assert!(parse_size("1MiB").is_err());
        assert!(parse_size("4Ki").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn scan_counts_every_byte() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.log");
        std::fs::write(&path, vec![7u8; 1000]).expect("write");

        let summary = scan(&path, WindowOptions::new(100, 60), Some(33)).expect("scan");
        assert_eq!(summary["bytes"], 1000);
        assert_eq!(summary["options"]["window_size"], 100);
        assert!(summary["remaps"].as_u64().unwrap() > 0);
    }

    #[test]
    fn scan_rejects_zero_chunk() {
        let err = scan(Path::new("/nonexistent"), WindowOptions::new(100, 60), Some(0))
            .expect_err("zero chunk");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn error_json_carries_kind_path_and_offset() {
        let err = Error::new(ErrorKind::InvalidAdvance)
            .with_message("advance too far")
            .with_path("/tmp/events.log")
            .with_offset(90);
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "InvalidAdvance");
        assert_eq!(value["error"]["message"], "advance too far");
        assert_eq!(value["error"]["path"], "/tmp/events.log");
        assert_eq!(value["error"]["offset"], 90);
        assert!(value["error"].get("causes").is_none());
    }

    #[test]
    fn error_text_lists_hint_and_cause() {
        let err = Error::new(ErrorKind::Usage)
            .with_message("invalid size")
            .with_hint("Use bytes or K/M/G (e.g. 5M).")
            .with_source(std::io::Error::other("boom"));
        let text = error_text(&err);
        assert!(text.starts_with("error: invalid size"));
        assert!(text.contains("hint: Use bytes"));
        assert!(text.contains("caused by: boom"));
    }
}
