//! Catalog entries, device identity and raw log records.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::timestamp::{EncodedTimestamp, FatTimestamp};

/// Suffix appended to the start time to form a raw log file name.
pub const LOG_SUFFIX: &str = "_DBI3.log";

/// One log as listed by the device.
///
/// The derived ordering compares `(start, stop, start_time, stop_time,
/// filename)` lexicographically, so a sorted catalog is oldest first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogCatalogEntry {
    /// Encoded start time; also the name used with `fs read` / `fs del`.
    pub start: EncodedTimestamp,
    /// Encoded stop time.
    pub stop: EncodedTimestamp,
    /// Decoded start time.
    pub start_time: FatTimestamp,
    /// Decoded stop time.
    pub stop_time: FatTimestamp,
    /// Local file name, `YYYY_MM_DD_HH_MM_SS_DBI3.log`.
    pub filename: String,
}

impl LogCatalogEntry {
    /// Build an entry from its two encoded names.
    #[must_use]
    pub fn new(start: EncodedTimestamp, stop: EncodedTimestamp) -> Self {
        let start_time = start.decode();
        let stop_time = stop.decode();
        let filename = format!("{}{LOG_SUFFIX}", start_time.log_basename());
        Self {
            start,
            stop,
            start_time,
            stop_time,
            filename,
        }
    }

    /// Parse one `fs list` line: `<start7> <stop7>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLogName`] when a token fails to decode and
    /// [`Error::UnexpectedResponse`] when the line does not hold two tokens.
    pub fn parse_line(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(start), Some(stop), None) => Ok(Self::new(
                EncodedTimestamp::new(start)?,
                EncodedTimestamp::new(stop)?,
            )),
            _ => Err(Error::unexpected("fs list", line)),
        }
    }

    /// Start as a calendar instant, if the decoded fields form one.
    #[must_use]
    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        self.start_time.to_datetime()
    }

    /// Recorded duration, if both ends are real calendar instants.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        Some(self.stop_time.to_datetime()? - self.start_time.to_datetime()?)
    }
}

impl fmt::Display for LogCatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.start, self.start_time)
    }
}

/// Serial number reported by the `sn` command, e.g. `SN11005`.
///
/// Used as the per-device subdirectory of the log store and as the suffix
/// of converted track names, so it must be a single plain path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceSerial(String);

impl DeviceSerial {
    /// Wrap a serial number as reported, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSerial`] for an empty serial, one starting
    /// with `.`, or one holding a path separator or control character.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let serial = raw.as_ref().trim();
        let unsafe_char = |c: char| c == '/' || c == '\\' || c.is_control();
        if serial.is_empty() || serial.starts_with('.') || serial.contains(unsafe_char) {
            return Err(Error::InvalidSerial {
                serial: serial.to_string(),
            });
        }
        Ok(Self(serial.to_string()))
    }

    /// The serial number as reported.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tag used in output names, always starting with `SN`.
    #[must_use]
    pub fn output_tag(&self) -> String {
        if self.0.starts_with("SN") {
            self.0.clone()
        } else {
            format!("SN{}", self.0)
        }
    }
}

impl TryFrom<String> for DeviceSerial {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DeviceSerial> for String {
    fn from(serial: DeviceSerial) -> Self {
        serial.0
    }
}

impl fmt::Display for DeviceSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The text of one log, line by line, exactly as the device sent it.
///
/// Blank lines are artifacts of the device's reversed `\n\r` line ending and
/// are dropped on construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLogRecord {
    lines: Vec<String>,
}

impl RawLogRecord {
    /// Build a record from lines, dropping blank ones.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines
            .into_iter()
            .map(Into::into)
            .filter(|line: &String| !line.trim().is_empty())
            .collect();
        Self { lines }
    }

    /// Parse stored file content.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self::from_lines(text.lines().map(|line| line.trim_end_matches('\r')))
    }

    /// The record lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the record has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// File content: one line per record line, newline terminated.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}
