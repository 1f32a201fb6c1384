//! `dbi3` - Retrieve and convert DBI3 balloon instrument flight logs
//!
//! This library talks to a DBI3 over its USB serial link, mirrors the logs it
//! holds into a local directory, and converts them into KML or CSV tracks.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod convert;
pub mod device;
pub mod error;
pub mod logging;
pub mod store;
pub mod sync;
pub mod timestamp;

pub use config::Config;
pub use convert::{convert, ConversionOptions, ConversionPipeline, ConversionReport, MetadataOverride};
pub use device::{connect, DeviceClient, DeviceLink, DeviceSerial, LogCatalogEntry, RawLogRecord};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use store::LogStore;
pub use sync::{CatalogFilter, SyncEngine, SyncReport};
pub use timestamp::{EncodedTimestamp, FatTimestamp};
