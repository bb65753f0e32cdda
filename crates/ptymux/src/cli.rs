//! Command line front end

use crate::config::{MuxConfig, DEFAULT_SESSIONS, MAX_SESSIONS};
use crate::{signals, Multiplexer, Registry, TerminalGuard};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::AsFd;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

const KEY_HELP: &str = "\
Keys (press Ctrl-A, then):
  1-9     switch to that session
  n / p   next / previous session
  q       quit, terminating every session
  Ctrl-A  send a literal Ctrl-A

Any other key, digits included, goes to the active session.";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ptymux - several interactive sessions behind one terminal (Ctrl-A 1-9 switches)",
    after_help = KEY_HELP
)]
pub struct Args {
    /// Number of sessions to start
    #[arg(
        default_value_t = DEFAULT_SESSIONS as u8,
        value_parser = clap::value_parser!(u8).range(1..=MAX_SESSIONS as i64)
    )]
    pub sessions: u8,

    /// Write diagnostics to this file (nothing is logged otherwise)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

/// Send diagnostics to `args.log_file`, if one was given
///
/// The terminal is in raw mode while the multiplexer runs, so logging never
/// goes to stderr.
pub fn init_logging(args: &Args) -> Result<()> {
    let Some(path) = &args.log_file else {
        return Ok(());
    };

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}

/// Start the sessions, run the multiplexer, and return every session's exit status
///
/// The terminal is restored before this returns, on success and on error.
pub fn run(args: &Args) -> Result<Vec<i32>> {
    let config = MuxConfig::with_sessions(usize::from(args.sessions));
    config.validate()?;

    signals::install()?;

    let registry = Registry::create(config.sessions, &config.command, config.history_capacity)
        .context("Failed to start sessions")?;

    // Declared before the multiplexer so it is dropped, and the terminal
    // restored, after every session has been reaped.
    let mut guard = TerminalGuard::acquire().context("Failed to enter raw mode")?;

    let input = File::from(
        io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .context("Failed to duplicate stdin")?,
    );
    let mut mux = Multiplexer::new(registry, input, io::stdout(), &config);
    let result = mux.run();
    drop(mux);

    guard.restore().context("Failed to restore terminal")?;
    let _ = io::stdout().flush();

    let statuses = result.context("Multiplexer failed")?;
    info!(?statuses, "all sessions reaped");
    Ok(statuses)
}
