//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::convert::{AltitudeMode, ConversionOptions, FieldSelection, TrackFormat};

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Download every log the store lacks, ignoring the new-only and age filters
    #[arg(short, long)]
    pub all: bool,

    /// Only download; do not convert the new logs
    #[arg(long)]
    pub no_convert: bool,

    /// Re-convert logs whose output already exists
    #[arg(short, long)]
    pub force: bool,
}

/// Commands that work on logs stored on the instrument.
#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// List the logs on the instrument
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Download specific logs by their 7-letter name
    Download {
        /// Encoded log names as shown by `logs list`
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Delete logs from the instrument
    Delete {
        /// Encoded log names as shown by `logs list`
        #[arg(required = true)]
        names: Vec<String>,

        /// Delete even if the log has not been downloaded
        #[arg(long)]
        force: bool,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Save a snapshot of the instrument settings to the log directory
    Settings {
        /// Print the settings instead of saving them
        #[arg(long)]
        show: bool,

        /// Also save the settings as JSON
        #[arg(short, long, conflicts_with = "show")]
        json: bool,
    },
}

/// Convert command arguments.
///
/// Options given here replace the configured defaults; a per-log override
/// file still wins over both.
#[derive(Debug, Args)]
pub struct ConvertCommand {
    /// Convert this file instead of the stored logs
    #[arg(long, value_name = "LOG")]
    pub file: Option<PathBuf>,

    /// Only convert logs of this device serial
    #[arg(short, long)]
    pub serial: Option<String>,

    /// Overwrite outputs that already exist
    #[arg(short, long)]
    pub force: bool,

    /// Output format (kml or csv)
    #[arg(long)]
    pub format: Option<TrackFormat>,

    /// Extra fields, comma separated, or ALL
    #[arg(long)]
    pub fields: Option<FieldSelection>,

    /// absolute, clampToGround or relativeToGround
    #[arg(long)]
    pub altitude_mode: Option<AltitudeMode>,

    /// Altitude correction in feet
    #[arg(long, allow_hyphen_values = true)]
    pub altitude_offset: Option<f64>,

    /// Show extra fields in metric units
    #[arg(long)]
    pub metric: bool,

    /// Text shown with each track
    #[arg(long)]
    pub note: Option<String>,
}

impl ConvertCommand {
    /// Apply the command-line options on top of configured options.
    #[must_use]
    pub fn apply(&self, mut options: ConversionOptions) -> ConversionOptions {
        if let Some(format) = self.format {
            options.format = format;
        }
        if let Some(fields) = &self.fields {
            options.fields = fields.clone();
        }
        if let Some(mode) = self.altitude_mode {
            options.altitude_mode = mode;
        }
        if self.altitude_offset.is_some() {
            options.altitude_offset_ft = self.altitude_offset;
        }
        if self.metric {
            options.use_metric = true;
        }
        if self.note.is_some() {
            options.track_note.clone_from(&self.note);
        }
        options
    }
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert_command() -> ConvertCommand {
        ConvertCommand {
            file: None,
            serial: None,
            force: false,
            format: None,
            fields: None,
            altitude_mode: None,
            altitude_offset: None,
            metric: false,
            note: None,
        }
    }

    #[test]
    fn test_apply_without_options_keeps_defaults() {
        let options = convert_command().apply(ConversionOptions::default());
        assert_eq!(options, ConversionOptions::default());
    }

    #[test]
    fn test_apply_replaces_options() {
        let cmd = ConvertCommand {
            format: Some(TrackFormat::Csv),
            fields: Some(FieldSelection::all()),
            altitude_mode: Some(AltitudeMode::ClampToGround),
            altitude_offset: Some(-20.0),
            metric: true,
            note: Some("Sam".to_string()),
            ..convert_command()
        };
        let options = cmd.apply(ConversionOptions::default());

        assert_eq!(options.format, TrackFormat::Csv);
        assert_eq!(options.fields, FieldSelection::all());
        assert_eq!(options.altitude_mode, AltitudeMode::ClampToGround);
        assert_eq!(options.altitude_offset_ft, Some(-20.0));
        assert!(options.use_metric);
        assert_eq!(options.track_note.as_deref(), Some("Sam"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_logs_command_debug() {
        let cmd = LogsCommand::Delete {
            names: vec!["AAAAAAA".to_string()],
            force: false,
            yes: true,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Delete"));
        assert!(debug_str.contains("AAAAAAA"));
    }
}
