//! Talking to the DBI3 over its USB serial link.
//!
//! [`connect`] resolves and opens the port, then hands back a
//! [`DeviceClient`] ready for catalog, read, delete and settings commands. A missing
//! instrument is an ordinary outcome, reported as [`DeviceLink::NotPresent`].

mod catalog;
mod client;
mod settings;
mod transport;

pub use catalog::{DeviceSerial, LogCatalogEntry, RawLogRecord, LOG_SUFFIX};
pub use client::{ClientState, DeviceClient, Timeouts};
pub use settings::{
    DeviceSettings, QueryShape, SettingsQuery, SettingsSection, SettingsValue, Subsetting,
    SETTINGS_QUERIES,
};
pub use transport::{
    find_usb_port, port_present, select_usb_port, ScriptedTransport, SerialTransport, Transport,
    COMMAND_TERMINATOR, DEVICE_EOL,
};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Outcome of trying to reach the instrument.
#[derive(Debug)]
pub enum DeviceLink {
    /// The port is open and the device answered.
    Connected {
        /// Client bound to the open port.
        client: DeviceClient<SerialTransport>,
        /// Serial number reported at connect time.
        serial: DeviceSerial,
    },
    /// No instrument is attached.
    NotPresent {
        /// Why the device was considered absent.
        reason: String,
    },
}

impl DeviceLink {
    /// Whether a device answered.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Resolve the serial port named in `config` or found by USB identity.
///
/// # Errors
///
/// Returns [`Error::DeviceNotPresent`] when no port can be found and
/// [`Error::AmbiguousDevice`] when auto-detection matches several.
pub fn resolve_port(config: &Config) -> Result<String> {
    if let Some(port) = &config.device.com_port {
        if port_present(port) {
            return Ok(port.clone());
        }
        return Err(Error::not_present(format!("configured port {port} not found")));
    }

    find_usb_port(config.device.usb_vid, config.device.usb_pid)?.ok_or_else(|| {
        Error::not_present(format!(
            "no USB serial port with id {:04x}:{:04x}",
            config.device.usb_vid, config.device.usb_pid
        ))
    })
}

/// Open the instrument and run the connection handshake.
///
/// # Errors
///
/// Returns an error when the port exists but cannot be opened, or when the
/// device does not answer the handshake.
pub fn connect(config: &Config) -> Result<DeviceLink> {
    let port = match resolve_port(config) {
        Ok(port) => port,
        Err(Error::DeviceNotPresent { reason }) => {
            warn!("DBI3 not present: {}", reason);
            return Ok(DeviceLink::NotPresent { reason });
        }
        Err(e) => return Err(e),
    };

    let transport = SerialTransport::open(&port, config.device.baud_rate, config.response_timeout())?;
    let mut client = DeviceClient::new(transport, Timeouts::from_config(config));
    let serial = client.initialize()?;
    info!("Connected to DBI3 {} on {}", serial, port);

    Ok(DeviceLink::Connected { client, serial })
}
