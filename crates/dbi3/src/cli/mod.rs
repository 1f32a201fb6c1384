//! Command-line interface for the DBI3 tool.
//!
//! This module provides the CLI structure and command handlers for the
//! `dbi3cli` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, ConvertCommand, LogsCommand, SyncCommand};

/// dbi3cli - Download and convert DBI3 balloon flight logs
///
/// Copies new logs from an attached DBI3 instrument into the log directory
/// and converts them to KML tracks for viewing in Google Earth.
#[derive(Debug, Parser)]
#[command(name = "dbi3cli")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv to add the serial exchange)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download new logs from the instrument and convert them
    Sync(SyncCommand),

    /// Work with logs stored on the instrument
    #[command(subcommand)]
    Logs(LogsCommand),

    /// Convert downloaded logs to KML or CSV
    Convert(ConvertCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
