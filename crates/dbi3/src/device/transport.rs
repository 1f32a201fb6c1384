//! Byte transports under the device protocol.
//!
//! [`Transport`] is the seam between the protocol client and the wire. The
//! real implementation is [`SerialTransport`]; [`ScriptedTransport`] replays
//! canned command/response pairs so the protocol can be exercised without
//! hardware.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use serialport::{FlowControl, SerialPort, SerialPortInfo, SerialPortType};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Terminator the device expects after each command.
pub const COMMAND_TERMINATOR: &str = "\r";

/// Line ending the device sends (reversed from the usual `\r\n`).
pub const DEVICE_EOL: &str = "\n\r";

/// A half-duplex byte pipe to the instrument.
pub trait Transport: fmt::Debug {
    /// Write bytes to the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever bytes arrive within `timeout`.
    ///
    /// Returns `Ok(0)` when the device stays silent for the whole window.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails for any reason other than timing out.
    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Discard input until the device has been silent for `quiet`.
    ///
    /// Returns the number of bytes thrown away.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails.
    fn drain(&mut self, quiet: Duration) -> Result<usize> {
        let mut buf = [0u8; 256];
        let mut discarded = 0;
        loop {
            let n = self.receive(&mut buf, quiet)?;
            if n == 0 {
                return Ok(discarded);
            }
            discarded += n;
        }
    }
}

/// Transport over a real serial port.
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open a port with the DBI3 line settings: 8N1, RTS/CTS, DTR asserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be opened or configured.
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        debug!("Opening serial port {} at {} baud", name, baud_rate);
        let mut port = serialport::new(name, baud_rate)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(FlowControl::Hardware)
            .open()?;
        port.write_data_terminal_ready(true)?;

        Ok(Self {
            name: name.to_string(),
            port,
            timeout,
        })
    }

    /// The port name this transport was opened on.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Find the single USB serial port with the given identity.
///
/// Returns `Ok(None)` when no port matches.
///
/// # Errors
///
/// Returns [`Error::AmbiguousDevice`] when more than one port matches, or a
/// serial error if ports cannot be enumerated.
pub fn find_usb_port(vid: u16, pid: u16) -> Result<Option<String>> {
    select_usb_port(serialport::available_ports()?, vid, pid)
}

/// Pick the single port with the given USB identity from a port listing.
///
/// # Errors
///
/// Returns [`Error::AmbiguousDevice`] when more than one port matches.
pub fn select_usb_port(
    ports: impl IntoIterator<Item = SerialPortInfo>,
    vid: u16,
    pid: u16,
) -> Result<Option<String>> {
    let mut matches: Vec<String> = ports
        .into_iter()
        .filter(|p| matches!(&p.port_type, SerialPortType::UsbPort(usb) if usb.vid == vid && usb.pid == pid))
        .map(|p| p.port_name)
        .collect();

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        _ => Err(Error::AmbiguousDevice { ports: matches }),
    }
}

/// Whether a named port currently exists.
#[must_use]
pub fn port_present(name: &str) -> bool {
    Path::new(name).exists()
        || serialport::available_ports()
            .map(|ports| ports.iter().any(|p| p.port_name == name))
            .unwrap_or(false)
}

/// One scripted exchange: the command expected and the bytes sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Exchange {
    command: String,
    response: Vec<u8>,
}

/// A fake device that replays scripted command/response pairs.
///
/// Each complete command written (terminated by `\r`) must match the next
/// scripted command; its response bytes then become readable. An empty read
/// buffer reads as silence, immediately, without sleeping.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: VecDeque<Exchange>,
    pending: VecDeque<u8>,
    partial: Vec<u8>,
    sent: Vec<String>,
    chunk_size: Option<usize>,
}

impl ScriptedTransport {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `command` and answer with `lines`, each ending in the device EOL.
    #[must_use]
    pub fn expect(self, command: &str, lines: &[&str]) -> Self {
        let mut response = String::new();
        for line in lines {
            response.push_str(line);
            response.push_str(DEVICE_EOL);
        }
        self.expect_raw(command, response.as_bytes())
    }

    /// Expect `command` and answer with exactly these bytes.
    #[must_use]
    pub fn expect_raw(mut self, command: &str, response: &[u8]) -> Self {
        self.script.push_back(Exchange {
            command: command.to_string(),
            response: response.to_vec(),
        });
        self
    }

    /// Expect `command` and answer with nothing.
    #[must_use]
    pub fn expect_silence(self, command: &str) -> Self {
        self.expect_raw(command, &[])
    }

    /// Bytes already waiting before the first command (stale output).
    #[must_use]
    pub fn with_pending(mut self, bytes: &[u8]) -> Self {
        self.pending.extend(bytes);
        self
    }

    /// Deliver at most `size` bytes per read, to exercise line reassembly.
    #[must_use]
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Every command received so far, without terminators.
    #[must_use]
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Number of scripted exchanges not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    fn complete_command(&mut self) -> Result<()> {
        let command = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        trace!("scripted device received '{}'", command);
        self.sent.push(command.clone());

        let Some(exchange) = self.script.pop_front() else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unscripted command '{command}'"),
            )));
        };
        if exchange.command != command {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("expected '{}', got '{command}'", exchange.command),
            )));
        }
        self.pending.extend(exchange.response);
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            if byte == b'\r' {
                self.complete_command()?;
            } else {
                self.partial.push(byte);
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let limit = self.chunk_size.unwrap_or(usize::MAX);
        let n = buf.len().min(self.pending.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
