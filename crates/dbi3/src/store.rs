//! Filesystem store for raw DBI3 logs.
//!
//! Logs live under `<log_path>/<serial>/YYYY_MM_DD_HH_MM_SS_DBI3.log`. Each
//! file is written exactly once and never modified afterwards. A log only
//! appears under its final name once it is complete on disk. Settings
//! snapshots go in the store root as `DBI3_<sn>_YYYYMMDD_HHMM.cfg` and `.json`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tracing::{debug, info};

use crate::device::{DeviceSerial, DeviceSettings, LogCatalogEntry, RawLogRecord};
use crate::error::{Error, Result};

const RAW_LOG_PATTERN: &str = r"^(\d{4})_(\d\d)_(\d\d)_(\d\d)_(\d\d)_(\d\d)_DBI3\.log$";

fn raw_log_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(RAW_LOG_PATTERN).expect("Invalid regex pattern"))
}

/// A raw log found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StoredLog {
    /// Full path of the log file.
    pub path: PathBuf,
    /// File name, e.g. `2021_07_04_06_30_10_DBI3.log`.
    pub file_name: String,
    /// Start minute taken from the name, `YYYYMMDD_HHMM`.
    pub stamp: String,
    /// Start time taken from the name, when it is a real calendar time.
    pub start: Option<NaiveDateTime>,
}

impl StoredLog {
    /// Recognize a raw log by its file name.
    ///
    /// Returns `None` for names that do not follow the raw log pattern.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let caps = raw_log_regex().captures(file_name)?;
        let part = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        let num = |i: usize| part(i).parse::<u32>().ok();

        let start = match (num(1), num(2), num(3), num(4), num(5), num(6)) {
            (Some(y), Some(mo), Some(d), Some(h), Some(mi), Some(s)) => {
                i32::try_from(y).ok().and_then(|y| {
                    NaiveDate::from_ymd_opt(y, mo, d).and_then(|date| date.and_hms_opt(h, mi, s))
                })
            }
            _ => None,
        };

        Some(Self {
            path: path.to_path_buf(),
            file_name: file_name.to_string(),
            stamp: format!("{}{}{}_{}{}", part(1), part(2), part(3), part(4), part(5)),
            start,
        })
    }
}

/// Raw log storage rooted at the configured log directory.
#[derive(Debug, Clone)]
pub struct LogStore {
    root: PathBuf,
}

impl LogStore {
    /// Open an existing log directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilesystemUnavailable`] if the directory is missing.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::FilesystemUnavailable { path: root });
        }
        debug!("Opened log store at {}", root.display());
        Ok(Self { root })
    }

    /// Open the log directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryCreate`] if the directory cannot be created.
    pub fn open_or_create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            info!("Creating log directory {}", root.display());
            fs::create_dir_all(root).map_err(|source| Error::DirectoryCreate {
                path: root.to_path_buf(),
                source,
            })?;
        }
        Self::open(root)
    }

    /// The store's base directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one device's logs.
    #[must_use]
    pub fn device_dir(&self, serial: &DeviceSerial) -> PathBuf {
        self.root.join(serial.as_str())
    }

    /// Where a catalog entry is stored.
    #[must_use]
    pub fn raw_log_path(&self, serial: &DeviceSerial, entry: &LogCatalogEntry) -> PathBuf {
        self.device_dir(serial).join(&entry.filename)
    }

    /// Whether a catalog entry has already been downloaded.
    #[must_use]
    pub fn contains(&self, serial: &DeviceSerial, entry: &LogCatalogEntry) -> bool {
        self.raw_log_path(serial, entry).is_file()
    }

    /// Persist a downloaded record. Fails if the file already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the device directory cannot be created or the file
    /// cannot be written.
    pub fn write_raw(
        &self,
        serial: &DeviceSerial,
        entry: &LogCatalogEntry,
        record: &RawLogRecord,
    ) -> Result<PathBuf> {
        let dir = self.device_dir(serial);
        fs::create_dir_all(&dir).map_err(|source| Error::DirectoryCreate {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(&entry.filename);
        let text = record.to_text();
        write_new(&path, |file| file.write_all(text.as_bytes()))?;

        debug!("Wrote {} lines to {}", record.len(), path.display());
        Ok(path)
    }

    /// Save an instrument settings snapshot taken at `taken`: the text
    /// report, and the JSON form when `json` is set.
    ///
    /// Returns the files written.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written or already exists.
    pub fn write_settings(
        &self,
        settings: &DeviceSettings,
        taken: &DateTime<Utc>,
        json: bool,
    ) -> Result<Vec<PathBuf>> {
        let stem = settings.file_stem(taken);
        let mut written = Vec::new();

        let report = self.root.join(format!("{stem}.cfg"));
        let text = settings.report(taken);
        write_new(&report, |file| file.write_all(text.as_bytes()))?;
        written.push(report);

        if json {
            let path = self.root.join(format!("{stem}.json"));
            let body = serde_json::to_string_pretty(settings)?;
            write_new(&path, |file| file.write_all(body.as_bytes()))?;
            written.push(path);
        }

        info!("Saved DBI3 {} settings to {}", settings.serial, self.root.display());
        Ok(written)
    }

    /// Read a stored log back.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_raw(path: &Path) -> Result<RawLogRecord> {
        let text = fs::read_to_string(path)?;
        Ok(RawLogRecord::from_text(&text))
    }

    /// Every raw log stored for a device, oldest first.
    ///
    /// A device with no directory yet has no logs.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn list_raw_logs(&self, serial: &DeviceSerial) -> Result<Vec<StoredLog>> {
        let dir = self.device_dir(serial);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut logs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(log) = StoredLog::from_path(&path) {
                logs.push(log);
            }
        }
        logs.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(logs)
    }

    /// Start time of the newest stored log for a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn latest_log_time(&self, serial: &DeviceSerial) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .list_raw_logs(serial)?
            .iter()
            .filter_map(|log| log.start)
            .max())
    }

    /// Serials of every device with at least one stored log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store root cannot be listed.
    pub fn device_serials(&self) -> Result<Vec<DeviceSerial>> {
        let mut serials = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_dir() || name.starts_with('.') {
                continue;
            }
            let Ok(serial) = DeviceSerial::new(name) else {
                continue;
            };
            if !self.list_raw_logs(&serial)?.is_empty() {
                serials.push(serial);
            }
        }
        serials.sort();
        Ok(serials)
    }
}

/// Create `path`, which must not exist, with content from `fill`.
///
/// The content goes to a hidden temporary file in the same directory that is
/// renamed into place only after `fill` and a sync succeed, and is removed
/// otherwise.
fn write_new(path: &Path, fill: impl FnOnce(&mut File) -> io::Result<()>) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
