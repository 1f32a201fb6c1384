//! Command/response client for the DBI3 serial shell.
//!
//! Commands are strictly sequential: each one is written, its reply is read
//! to completion, and only then may the next command go out. One-line replies
//! are bounded by the response timeout; multi-line transfers (`fs list`,
//! `fs read`) end when the device has been silent for the idle timeout.
//! Settings dumps are closed off by a trailing `md mach` instead.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::catalog::{DeviceSerial, LogCatalogEntry, RawLogRecord};
use super::settings::{
    DeviceSettings, QueryShape, SettingsSection, SettingsValue, Subsetting, SETTINGS_QUERIES,
};
use super::transport::{Transport, COMMAND_TERMINATOR};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::WIRE_TARGET;
use crate::timestamp::EncodedTimestamp;

const MD_MACH: &str = "md mach";
const FS_STOP: &str = "fs stop";
const FS_LIST: &str = "fs list";
const SERIAL_NUMBER: &str = "sn";

const REPLY_OK: &str = "ok";
const REPLY_NOK: &str = "nok";

/// Read buffer size for one transport read.
const READ_CHUNK: usize = 2048;

/// Where the client is in its command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Ready for the next command.
    Idle,
    /// A command is out and its reply is being read.
    AwaitingResponse,
    /// The client was closed; every command fails.
    Closed,
}

/// Timing limits for the three kinds of reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for a one-line reply.
    pub response: Duration,
    /// Silence that ends a multi-line transfer.
    pub idle: Duration,
    /// Wait for the acknowledgement that follows a delete.
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            response: Duration::from_secs(2),
            idle: Duration::from_secs(2),
            delete: Duration::from_secs(20),
        }
    }
}

impl Timeouts {
    /// Timeouts from the device section of the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            response: config.response_timeout(),
            idle: config.idle_timeout(),
            delete: config.delete_timeout(),
        }
    }
}

/// Client for one DBI3 over one transport.
#[derive(Debug)]
pub struct DeviceClient<T: Transport> {
    transport: T,
    state: ClientState,
    timeouts: Timeouts,
    pending: Vec<u8>,
}

impl<T: Transport> DeviceClient<T> {
    /// Wrap a transport. No bytes are exchanged until a command is issued.
    pub fn new(transport: T, timeouts: Timeouts) -> Self {
        Self {
            transport,
            state: ClientState::Idle,
            timeouts,
            pending: Vec::new(),
        }
    }

    /// Discard stale output, run the preamble and read the serial number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolTimeout`] if the device does not answer.
    pub fn initialize(&mut self) -> Result<DeviceSerial> {
        self.ensure_open()?;
        let discarded = self.transport.drain(self.timeouts.response.min(Duration::from_millis(250)))?;
        if discarded > 0 {
            debug!("Discarded {} stale bytes from device", discarded);
        }
        self.pending.clear();
        self.prepare()?;
        self.serial_number()
    }

    /// The client's current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume the client, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Ask the device for its serial number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolTimeout`] when the device stays silent.
    pub fn serial_number(&mut self) -> Result<DeviceSerial> {
        let reply = self.command(SERIAL_NUMBER, self.timeouts.response)?;
        let serial = DeviceSerial::new(&reply).map_err(|_| Error::unexpected(SERIAL_NUMBER, reply))?;
        debug!("DBI3 serial number {}", serial);
        Ok(serial)
    }

    /// List the logs stored on the device, oldest first.
    ///
    /// Lines that fail to decode are logged and skipped. An empty catalog is
    /// a valid answer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolTimeout`] if the preamble goes unanswered.
    pub fn list_catalog(&mut self) -> Result<Vec<LogCatalogEntry>> {
        self.prepare()?;
        let lines = self.transfer(FS_LIST)?;

        let mut entries = Vec::with_capacity(lines.len());
        for line in &lines {
            match LogCatalogEntry::parse_line(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping catalog line '{}': {}", line, e),
            }
        }
        entries.sort();
        info!("DBI3 catalog holds {} logs", entries.len());
        Ok(entries)
    }

    /// Fetch one log by its encoded start name.
    ///
    /// Returns `None` when the device sends nothing back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolTimeout`] if the preamble goes unanswered.
    pub fn read_log(&mut self, name: &EncodedTimestamp) -> Result<Option<RawLogRecord>> {
        self.prepare()?;
        let lines = self.transfer(&format!("fs read {name}"))?;
        let record = RawLogRecord::from_lines(lines);
        if record.is_empty() {
            warn!("DBI3 returned no data for log {}", name);
            return Ok(None);
        }
        debug!("Read {} lines for log {}", record.len(), name);
        Ok(Some(record))
    }

    /// Delete one log from the device.
    ///
    /// The device gives no reply to `fs del` itself, so an `md mach` follows
    /// and its answer, within the delete timeout, marks completion. Returns
    /// whether that answer arrived.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolTimeout`] if the preamble goes unanswered.
    pub fn delete_log(&mut self, name: &EncodedTimestamp) -> Result<bool> {
        self.prepare()?;
        self.ensure_open()?;
        self.send(&format!("fs del {name}"))?;
        self.send(MD_MACH)?;

        self.state = ClientState::AwaitingResponse;
        let reply = self.read_line(self.timeouts.delete);
        self.state = ClientState::Idle;

        match reply? {
            Some(reply) if reply == REPLY_OK || reply == REPLY_NOK => {
                info!("Deleted log {} from DBI3", name);
                Ok(true)
            }
            Some(reply) => {
                warn!("Unexpected reply '{}' deleting log {}", reply, name);
                Ok(false)
            }
            None => {
                warn!("No acknowledgement deleting log {}", name);
                Ok(false)
            }
        }
    }

    /// Read every instrument setting.
    ///
    /// A query the device leaves unanswered is kept without a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolTimeout`] if the preamble goes unanswered.
    pub fn read_settings(&mut self, serial: &DeviceSerial) -> Result<DeviceSettings> {
        self.prepare()?;

        let mut sections = Vec::with_capacity(SETTINGS_QUERIES.len());
        for query in SETTINGS_QUERIES {
            let value = match query.shape {
                QueryShape::Value => SettingsValue::Value(self.ask(query.command)?),
                QueryShape::Subsettings(subs) => {
                    let mut values = Vec::with_capacity(subs.len());
                    for &(name, description) in subs {
                        values.push(Subsetting {
                            name,
                            value: self.ask(&format!("{} {name}", query.command))?,
                            description,
                        });
                    }
                    SettingsValue::Subsettings(values)
                }
                QueryShape::Lines => SettingsValue::Lines(self.ask_lines(query.command)?),
            };
            sections.push(SettingsSection {
                command: query.command,
                title: query.title,
                value,
            });
        }

        info!("Read {} settings sections from DBI3 {}", sections.len(), serial);
        Ok(DeviceSettings {
            serial: serial.clone(),
            sections,
        })
    }

    /// Leave the device idle: stop logging activity, then `md mach`.
    ///
    /// # Errors
    ///
    /// Returns an error if either command fails.
    pub fn quiesce(&mut self) -> Result<()> {
        self.expect(FS_STOP, &[REPLY_OK, REPLY_NOK])?;
        self.expect(MD_MACH, &[REPLY_OK])?;
        Ok(())
    }

    /// Close the client. Later commands fail with [`Error::DeviceClosed`].
    pub fn close(&mut self) {
        if self.state != ClientState::Closed {
            debug!("Closing DBI3 client");
            self.state = ClientState::Closed;
            self.pending.clear();
        }
    }

    /// The preamble that precedes every catalog, read and delete.
    fn prepare(&mut self) -> Result<()> {
        self.expect(MD_MACH, &[REPLY_OK])?;
        self.expect(FS_STOP, &[REPLY_OK, REPLY_NOK])?;
        Ok(())
    }

    fn expect(&mut self, command: &str, allowed: &[&str]) -> Result<String> {
        let reply = self.command(command, self.timeouts.response)?;
        if allowed.contains(&reply.as_str()) {
            Ok(reply)
        } else {
            Err(Error::unexpected(command, reply))
        }
    }

    /// Send a command and read its one-line reply.
    fn command(&mut self, command: &str, timeout: Duration) -> Result<String> {
        self.ensure_open()?;
        self.send(command)?;

        self.state = ClientState::AwaitingResponse;
        let reply = self.read_line(timeout);
        self.state = ClientState::Idle;

        reply?.ok_or_else(|| Error::timeout(command))
    }

    /// Send a query and read its one-line answer, if any.
    fn ask(&mut self, command: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        self.send(command)?;

        self.state = ClientState::AwaitingResponse;
        let reply = self.read_line(self.timeouts.response);
        self.state = ClientState::Idle;

        let reply = reply?;
        if reply.is_none() {
            warn!("No answer to '{}'", command);
        }
        Ok(reply)
    }

    /// Send a query followed by `md mach`; its lines end at the `ok`/`nok`.
    fn ask_lines(&mut self, command: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.send(command)?;
        self.send(MD_MACH)?;

        self.state = ClientState::AwaitingResponse;
        let mut lines = Vec::new();
        let result = loop {
            match self.read_line(self.timeouts.idle) {
                Ok(Some(line)) if line == REPLY_OK || line == REPLY_NOK => break Ok(lines),
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {
                    warn!("'{}' output did not end with an acknowledgement", command);
                    break Ok(lines);
                }
                Err(e) => break Err(e),
            }
        };
        self.state = ClientState::Idle;
        result
    }

    /// Send a command and collect every line until the device goes quiet.
    fn transfer(&mut self, command: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.send(command)?;

        self.state = ClientState::AwaitingResponse;
        let lines = self.read_until_silence();
        self.state = ClientState::Idle;
        lines
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ClientState::Closed {
            Err(Error::DeviceClosed)
        } else {
            Ok(())
        }
    }

    fn send(&mut self, command: &str) -> Result<()> {
        trace!(target: WIRE_TARGET, "-> {}", command);
        self.transport
            .send(format!("{command}{COMMAND_TERMINATOR}").as_bytes())
    }

    /// Read the next non-blank line, or `None` if `timeout` passes in silence.
    ///
    /// Lines are split on `\n` and trimmed, which also strips the `\r` the
    /// device sends after each newline. Bytes left without a newline when the
    /// device goes quiet are returned as a final line.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if !line.is_empty() {
                    trace!(target: WIRE_TARGET, "<- {}", line);
                    return Ok(Some(line));
                }
            }

            let n = self.transport.receive(&mut chunk, timeout)?;
            if n == 0 {
                let rest = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                if rest.is_empty() {
                    return Ok(None);
                }
                trace!(target: WIRE_TARGET, "<- {} (unterminated)", rest);
                return Ok(Some(rest));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }

    fn read_until_silence(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.read_line(self.timeouts.idle)? {
            lines.push(line);
        }
        Ok(lines)
    }
}
