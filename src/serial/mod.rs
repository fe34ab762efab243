//! Serial link ownership and request/reply exchanges
//!
//! A [`SerialLink`] owns at most one open transport. Every I/O call takes the
//! link's lock for its whole duration, so a write and the read of its reply
//! can never be split by another caller. Any I/O error closes the link; the
//! caller decides whether to reopen it.

#[cfg(test)]
pub(crate) mod mock;

use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

use crate::core::{Error, LinkConfig, Result};

/// Upper bound on the bytes collected for one reply
pub const READ_BUFFER_SIZE: usize = 1024;

/// Byte transport behind a serial link
pub trait SerialTransport: Read + Write + Send {
    /// Drops whatever input is waiting, without blocking
    fn clear_input(&mut self) -> io::Result<()>;
}

impl SerialTransport for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// One physical serial port, opened on demand
pub struct SerialLink {
    /// Name used in log messages
    name: String,
    /// Device settings
    config: LinkConfig,
    /// Open transport, if any
    port: Mutex<Option<Box<dyn SerialTransport>>>,
}

impl SerialLink {
    /// Creates a closed link
    pub fn new(name: impl Into<String>, config: LinkConfig) -> Self {
        SerialLink {
            name: name.into(),
            config,
            port: Mutex::new(None),
        }
    }

    /// Opens the configured device, replacing any open transport
    pub fn open(&self) -> Result<()> {
        let port = serialport::new(self.config.path.as_str(), self.config.baud_rate)
            .timeout(self.config.timeout)
            .open()
            .map_err(|e| {
                Error::link_unavailable(format!("{} ({}): {}", self.name, self.config.path, e))
            })?;

        info!(link = %self.name, path = %self.config.path, baud = self.config.baud_rate, "serial link opened");
        self.attach(Box::new(port));
        Ok(())
    }

    /// Installs an already-open transport
    pub fn attach(&self, transport: Box<dyn SerialTransport>) {
        *self.lock_port() = Some(transport);
    }

    /// Whether a transport is installed
    pub fn is_open(&self) -> bool {
        self.lock_port().is_some()
    }

    /// Drops the transport. Safe on a closed or never-opened link.
    pub fn close(&self) {
        if self.lock_port().take().is_some() {
            info!(link = %self.name, "serial link closed");
        }
    }

    /// Link name used in messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settle delay between a command and its reply
    pub fn settle(&self) -> Duration {
        self.config.settle
    }

    /// Writes a command and collects its reply.
    ///
    /// Stale input is discarded first. An empty reply means the device
    /// stayed silent until the read timeout and is not an error.
    pub fn exchange(&self, command: &[u8]) -> Result<Vec<u8>> {
        let settle = self.config.settle;
        self.with_port(|port| {
            write_command(port, command)?;
            if !settle.is_zero() {
                thread::sleep(settle);
            }
            read_available(port)
        })
    }

    /// Writes bytes without waiting for a reply
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        self.with_port(|port| write_command(port, bytes))
    }

    /// Collects whatever the device has sent since the last read
    pub fn receive(&self) -> Result<Vec<u8>> {
        self.with_port(read_available)
    }

    fn with_port<T>(
        &self,
        op: impl FnOnce(&mut dyn SerialTransport) -> io::Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock_port();
        let port = guard
            .as_mut()
            .ok_or_else(|| Error::link_unavailable(format!("{} port is not open", self.name)))?;

        match op(&mut **port) {
            Ok(value) => Ok(value),
            Err(e) => {
                *guard = None;
                warn!(link = %self.name, error = %e, "serial I/O failed, link closed");
                Err(Error::link_failure(format!("{}: {}", self.name, e)))
            }
        }
    }

    fn lock_port(&self) -> MutexGuard<'_, Option<Box<dyn SerialTransport>>> {
        self.port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn write_command(port: &mut dyn SerialTransport, bytes: &[u8]) -> io::Result<()> {
    port.clear_input()?;
    port.write_all(bytes)?;
    port.flush()
}

fn read_available(port: &mut dyn SerialTransport) -> io::Result<Vec<u8>> {
    let mut reply = Vec::new();
    let mut chunk = [0u8; READ_BUFFER_SIZE];

    while reply.len() < READ_BUFFER_SIZE {
        let want = READ_BUFFER_SIZE - reply.len();
        match port.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => reply.extend_from_slice(&chunk[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    debug!(bytes = reply.len(), "serial read complete");
    Ok(reply)
}
