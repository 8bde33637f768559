//! Controller link implementations
//!
//! The controller link carries messages between the gateway and the
//! home-automation controller. Every link here speaks the line protocol in
//! [`protocol`]:
//!
//! - [`channel::ChannelLink`] - in-process line channels (stdio, tests)
//! - [`serial::SerialLink`] - serial port (requires `serial` feature)
//! - [`tcp::TcpLink`] - TCP listener (requires `tcp` feature)
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   # Ubuntu/Debian
//!   apt install libudev-dev pkg-config
//!   ```

pub mod channel;
pub mod protocol;

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
pub use serial::SerialLink;

#[cfg(feature = "tcp")]
mod tcp;
#[cfg(feature = "tcp")]
pub use tcp::TcpLink;

pub use channel::{ChannelLink, ControllerEndpoint};

use crate::error::Result;
use crate::message::Message;

/// Trait for controller links
///
/// Polling is non-blocking: `receive` returns `None` when no complete
/// command is pending. Malformed input is logged and skipped by the link.
pub trait ControllerLink {
    /// One-time setup (open the port, start listening, ...)
    fn begin(&mut self) -> Result<()>;

    /// Poll for one inbound command
    fn receive(&mut self) -> Option<Message>;

    /// Write a message to the controller
    fn send(&mut self, message: &Message) -> bool;

    /// Link name (for logging)
    fn name(&self) -> &str;
}

impl<C: ControllerLink + ?Sized> ControllerLink for Box<C> {
    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn receive(&mut self) -> Option<Message> {
        (**self).receive()
    }

    fn send(&mut self, message: &Message) -> bool {
        (**self).send(message)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Accumulates raw bytes from a stream and yields complete lines
///
/// Carriage returns are stripped; lines longer than the limit are discarded.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    /// Longest line accepted
    pub(crate) const MAX_LINE: usize = 256;

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line, if any
    pub(crate) fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > Self::MAX_LINE {
                    tracing::warn!(discarded = self.buffer.len(), "Controller line too long");
                    self.buffer.clear();
                    self.overflowed = true;
                }
                return None;
            };

            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if std::mem::take(&mut self.overflowed) {
                // Tail of a discarded line
                continue;
            }
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            return Some(line.trim_end_matches('\r').to_string());
        }
    }
}
