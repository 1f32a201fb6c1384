//! Reconciling the device catalog with the local log store.
//!
//! A sync pass walks the catalog oldest first, downloads every log the store
//! does not yet hold and leaves the device quiescent afterwards, however the
//! pass ended.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::device::{DeviceClient, DeviceSerial, LogCatalogEntry, Transport};
use crate::error::Result;
use crate::store::LogStore;
use crate::timestamp::FatTimestamp;

/// Logs shorter than this cannot hold a GPS record.
const MIN_VALID_DURATION_SECS: i64 = 3;

/// Which catalog entries a sync pass considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatalogFilter {
    /// Only logs starting after the newest stored log.
    pub new_logs_only: bool,
    /// Drop logs too short to be useful.
    pub skip_invalid: bool,
    /// Drop logs that started longer ago than this.
    pub age_limit: Option<Duration>,
}

impl CatalogFilter {
    /// Filter settings from the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            new_logs_only: config.filter.new_logs_only,
            skip_invalid: config.filter.skip_invalid,
            age_limit: config.age_limit(),
        }
    }

    /// Select entries from a catalog.
    ///
    /// `latest_stored` is the start of the newest log already on disk; when
    /// `new_logs_only` is set and a stored log exists it takes precedence over
    /// the age limit. Start times are compared on their raw decoded fields so
    /// entries with implausible dates still order consistently. With
    /// `skip_invalid`, an entry whose times do not form real dates counts as
    /// invalid.
    #[must_use]
    pub fn select(
        &self,
        catalog: &[LogCatalogEntry],
        latest_stored: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> Vec<LogCatalogEntry> {
        let limit = match (self.new_logs_only, latest_stored, self.age_limit) {
            (true, Some(latest), _) => Some(latest + Duration::seconds(1)),
            (_, _, Some(age)) => Some(now - age),
            _ => None,
        }
        .map(|dt| FatTimestamp::from_datetime(&dt));

        catalog
            .iter()
            .filter(|entry| {
                if let Some(limit) = &limit {
                    if entry.start_time < *limit {
                        debug!("Ignoring log {}: older than {}", entry, limit);
                        return false;
                    }
                }
                if self.skip_invalid {
                    let long_enough = entry
                        .duration()
                        .is_some_and(|d| d >= Duration::seconds(MIN_VALID_DURATION_SECS));
                    if !long_enough {
                        debug!("Ignoring log {}: too short", entry);
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect()
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Logs downloaded and stored in this pass.
    pub downloaded: Vec<LogCatalogEntry>,
    /// Logs already present in the store.
    pub skipped: Vec<LogCatalogEntry>,
    /// Logs the device returned no data for.
    pub empty: Vec<LogCatalogEntry>,
    /// Logs that failed, with the reason.
    pub failed: Vec<(LogCatalogEntry, String)>,
    /// Why the pass stopped early, if the device stopped answering.
    pub aborted: Option<String>,
    /// Whether the pass was cancelled by the caller.
    pub cancelled: bool,
}

impl SyncReport {
    /// Whether every selected entry was handled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && !self.cancelled
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaded {}, skipped {}, empty {}, failed {}",
            self.downloaded.len(),
            self.skipped.len(),
            self.empty.len(),
            self.failed.len()
        )?;
        if let Some(reason) = &self.aborted {
            write!(f, " (aborted: {reason})")?;
        } else if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Drives downloads for one connected device into one store.
#[derive(Debug)]
pub struct SyncEngine<'a, T: Transport> {
    client: &'a mut DeviceClient<T>,
    store: &'a LogStore,
    serial: DeviceSerial,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, T: Transport> SyncEngine<'a, T> {
    /// Create an engine for the device with the given serial number.
    pub fn new(client: &'a mut DeviceClient<T>, store: &'a LogStore, serial: DeviceSerial) -> Self {
        Self {
            client,
            store,
            serial,
            cancel: None,
        }
    }

    /// Stop between entries once `flag` is set.
    #[must_use]
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// List the device catalog, filter it and synchronize the selection.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal conditions, such as a store directory
    /// that cannot be created or listed.
    pub fn run(&mut self, filter: &CatalogFilter, now: NaiveDateTime) -> Result<SyncReport> {
        let catalog = match self.client.list_catalog() {
            Ok(catalog) => catalog,
            Err(e) if e.is_fatal() => {
                self.quiesce();
                return Err(e);
            }
            Err(e) => {
                error!("Cannot list DBI3 logs: {}", e);
                self.quiesce();
                return Ok(SyncReport {
                    aborted: Some(e.to_string()),
                    ..SyncReport::default()
                });
            }
        };

        let latest = match self.store.latest_log_time(&self.serial) {
            Ok(latest) => latest,
            Err(e) => {
                self.quiesce();
                return Err(e);
            }
        };
        let selected = filter.select(&catalog, latest, now);
        info!(
            "{} of {} logs on {} selected for sync",
            selected.len(),
            catalog.len(),
            self.serial
        );
        self.synchronize(&selected)
    }

    /// Download every entry the store lacks, in catalog order.
    ///
    /// A protocol timeout ends the pass; other per-entry failures are recorded
    /// and the pass continues. The device is quiesced before returning.
    ///
    /// # Errors
    ///
    /// Returns an error only for fatal filesystem conditions.
    pub fn synchronize(&mut self, catalog: &[LogCatalogEntry]) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for entry in catalog {
            if self.is_cancelled() {
                info!("Sync cancelled");
                report.cancelled = true;
                break;
            }

            if self.store.contains(&self.serial, entry) {
                debug!("Already have {}", entry.filename);
                report.skipped.push(entry.clone());
                continue;
            }

            match self.download(entry) {
                Ok(true) => report.downloaded.push(entry.clone()),
                Ok(false) => report.empty.push(entry.clone()),
                Err(e) if e.is_fatal() => {
                    self.quiesce();
                    return Err(e);
                }
                Err(e) if e.is_timeout() => {
                    error!("DBI3 stopped responding during {}: {}", entry.filename, e);
                    report.aborted = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!("Failed to download {}: {}", entry.filename, e);
                    report.failed.push((entry.clone(), e.to_string()));
                }
            }
        }

        self.quiesce();
        info!("Sync finished: {}", report);
        Ok(report)
    }

    fn download(&mut self, entry: &LogCatalogEntry) -> Result<bool> {
        let Some(record) = self.client.read_log(&entry.start)? else {
            return Ok(false);
        };
        let path = self.store.write_raw(&self.serial, entry, &record)?;
        info!("Downloaded {} ({} records)", path.display(), record.len());
        Ok(true)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn quiesce(&mut self) {
        if let Err(e) = self.client.quiesce() {
            warn!("Failed to quiesce DBI3: {}", e);
        }
    }
}
