//! Serial channel abstraction
//!
//! [`SerialLink`] is the seam between the session worker and the hardware:
//! the real implementation wraps a `serialport` handle, the mock (behind the
//! `mock-link` feature) replays scripted chunks for tests. Reads are bounded
//! by the port timeout so the worker loop keeps turning between chunks.

use std::time::Duration;

use crate::error::{Result, TelemvisError};
use crate::types::DeviceIdentity;

/// Read timeout configured on opened ports: long enough to batch a few
/// bytes, short enough that the worker loop stays responsive
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// A bidirectional, half-duplex byte channel to a telemetry device
#[cfg_attr(test, mockall::automock)]
pub trait SerialLink: Send {
    /// Read whatever bytes are available, up to `buf.len()`.
    ///
    /// Returns `Ok(0)` when nothing arrived within the port timeout; a real
    /// I/O failure (device unplugged, handle closed) is an `Err` and routes
    /// into the worker's cleanup path.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write raw bytes (a command string plus its line terminator)
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// USB identity of the connected device, when known
    fn identity(&self) -> Option<DeviceIdentity>;
}

/// A serial port visible on the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    /// OS port name (`/dev/ttyUSB0`, `COM3`, ...)
    pub name: String,
    /// USB identity, absent for non-USB ports
    pub identity: Option<DeviceIdentity>,
}

/// Enumerate the serial ports currently visible on the system
pub fn list_ports() -> Vec<PortEntry> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| PortEntry {
                name: info.port_name,
                identity: match info.port_type {
                    serialport::SerialPortType::UsbPort(usb) => {
                        Some(DeviceIdentity::new(usb.vid, usb.pid))
                    }
                    _ => None,
                },
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Pick the port matching a remembered identity out of an enumeration.
///
/// Both vendor and product ID must match; the first exact match wins.
pub fn match_identity(ports: &[PortEntry], identity: DeviceIdentity) -> Option<&PortEntry> {
    ports.iter().find(|p| p.identity == Some(identity))
}

/// Enumerate ports and pick the one matching a remembered identity
pub fn find_matching(identity: DeviceIdentity) -> Option<PortEntry> {
    let ports = list_ports();
    match_identity(&ports, identity).cloned()
}

/// [`SerialLink`] over a real serial port
pub struct SerialPortLink {
    port: Box<dyn serialport::SerialPort>,
    identity: Option<DeviceIdentity>,
}

impl SerialPortLink {
    /// Open a port at the fixed per-mode baud rate
    pub fn open(name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(name, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        let identity = list_ports()
            .into_iter()
            .find(|p| p.name == name)
            .and_then(|p| p.identity);
        tracing::info!(
            "opened {} at {} baud (identity: {})",
            name,
            baud_rate,
            identity.map(|i| i.to_string()).unwrap_or_else(|| "unknown".into())
        );
        Ok(Self { port, identity })
    }
}

impl SerialLink for SerialPortLink {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        use std::io::Read;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            // An interrupted read is not a channel failure either
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(TelemvisError::Io(e)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        use std::io::Write;
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }
}
