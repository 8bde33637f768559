//! Serial port controller link
//!
//! The classic gateway setup: the controller talks to the gateway over a
//! USB serial adapter, one protocol line per message. The port is opened
//! with a zero read timeout so polling never blocks.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::DEFAULT_BAUD_RATE;
use crate::controller::protocol::{encode_line, parse_line};
use crate::controller::{ControllerLink, LineBuffer};
use crate::error::{GatewayError, Result};
use crate::message::Message;

/// Bytes read from the port per poll
const READ_CHUNK: usize = 64;

/// Serial controller link
pub struct SerialLink {
    /// Serial port path
    port_path: String,

    /// Baud rate
    baud_rate: u32,

    /// Open port (after `begin`)
    port: Option<Box<dyn serialport::SerialPort>>,

    /// Partial input
    lines: LineBuffer,

    /// Link name for logging
    name: String,
}

impl SerialLink {
    /// Create a link for the given port
    pub fn new(port: impl Into<String>) -> Self {
        let port_path = port.into();
        let name = format!("serial:{}", port_path);

        Self {
            port_path,
            baud_rate: DEFAULT_BAUD_RATE,
            port: None,
            lines: LineBuffer::default(),
            name,
        }
    }

    /// Use a custom baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Port path
    pub fn port_path(&self) -> &str {
        &self.port_path
    }

    fn fill(&mut self) -> bool {
        let Some(port) = self.port.as_mut() else {
            return false;
        };

        let mut chunk = [0u8; READ_CHUNK];
        match port.read(&mut chunk) {
            Ok(0) => false,
            Ok(n) => {
                trace!(bytes = n, "Serial bytes received");
                self.lines.push(&chunk[..n]);
                true
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => false,
            Err(e) => {
                warn!(port = %self.port_path, "Serial read error: {}", e);
                false
            }
        }
    }
}

impl ControllerLink for SerialLink {
    fn begin(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        debug!(port = %self.port_path, baud = self.baud_rate, "Opening serial port");
        let port = serialport::new(self.port_path.as_str(), self.baud_rate)
            .timeout(Duration::ZERO)
            .open()
            .map_err(|e| match GatewayError::from(e) {
                GatewayError::PortOpenFailed { reason, .. } => GatewayError::PortOpenFailed {
                    port: self.port_path.clone(),
                    reason,
                },
                other => other,
            })?;

        info!(port = %self.port_path, "Serial controller link open");
        self.port = Some(port);
        Ok(())
    }

    fn receive(&mut self) -> Option<Message> {
        loop {
            while let Some(line) = self.lines.next_line() {
                match parse_line(&line) {
                    Ok(message) => return Some(message),
                    Err(e) => warn!(link = %self.name, "Ignoring controller line: {}", e),
                }
            }
            if !self.fill() {
                return None;
            }
        }
    }

    fn send(&mut self, message: &Message) -> bool {
        let Some(port) = self.port.as_mut() else {
            warn!("{}", GatewayError::NotStarted(self.name.clone()));
            return false;
        };

        let mut line = encode_line(message);
        line.push('\n');
        match port.write_all(line.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!(port = %self.port_path, "Serial write error: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
