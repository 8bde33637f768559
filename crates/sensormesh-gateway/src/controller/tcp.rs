//! TCP controller link
//!
//! Ethernet-gateway style: the gateway listens and the controller connects.
//! One controller is served at a time; a newer connection replaces the
//! current one. Listener and stream are non-blocking; output the socket
//! cannot take yet is queued and flushed on later polls.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

use crate::controller::protocol::{encode_line, parse_line};
use crate::controller::{ControllerLink, LineBuffer};
use crate::error::{GatewayError, Result};
use crate::message::Message;

/// Bytes read from the socket per poll
const READ_CHUNK: usize = 256;

/// Output queued for a slow controller before whole lines are dropped
const MAX_OUTBOUND: usize = 16 * 1024;

/// TCP controller link
pub struct TcpLink {
    bind: SocketAddr,
    listener: Option<TcpListener>,
    client: Option<(TcpStream, SocketAddr)>,
    lines: LineBuffer,
    outbound: Vec<u8>,
    name: String,
}

impl TcpLink {
    /// Create a link listening on `bind` once started
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            listener: None,
            client: None,
            lines: LineBuffer::default(),
            outbound: Vec::new(),
            name: format!("tcp:{}", bind),
        }
    }

    /// Actual listening address (useful when binding port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Whether a controller is connected
    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Bytes waiting for the controller to catch up
    pub fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    fn disconnect(&mut self) {
        self.client = None;
        self.outbound.clear();
    }

    fn accept(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };

        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!(%peer, "Rejecting controller connection: {}", e);
                    return;
                }
                if let Some((_, old)) = self.client.replace((stream, peer)) {
                    info!(%old, "Controller connection replaced");
                }
                self.lines = LineBuffer::default();
                self.outbound.clear();
                info!(%peer, "Controller connected");
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("Controller accept failed: {}", e),
        }
    }

    fn fill(&mut self) -> bool {
        let Some((stream, peer)) = self.client.as_mut() else {
            return false;
        };

        let mut chunk = [0u8; READ_CHUNK];
        match stream.read(&mut chunk) {
            Ok(0) => {
                info!(peer = %peer, "Controller disconnected");
                self.disconnect();
                false
            }
            Ok(n) => {
                trace!(bytes = n, "Controller bytes received");
                self.lines.push(&chunk[..n]);
                true
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => {
                warn!(peer = %peer, "Controller read failed: {}", e);
                self.disconnect();
                false
            }
        }
    }

    /// Write as much queued output as the socket accepts
    fn flush(&mut self) {
        let Some((stream, peer)) = self.client.as_mut() else {
            return;
        };

        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => {
                    info!(peer = %peer, "Controller stopped accepting output");
                    break;
                }
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(peer = %peer, "Controller write failed: {}", e);
                    break;
                }
            }
        }

        if !self.outbound.is_empty() {
            self.disconnect();
        }
    }
}

impl ControllerLink for TcpLink {
    fn begin(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.bind).map_err(|e| GatewayError::BindFailed {
            addr: self.bind.to_string(),
            reason: e.to_string(),
        })?;
        listener.set_nonblocking(true)?;

        debug!(addr = ?listener.local_addr().ok(), "TCP controller link listening");
        self.listener = Some(listener);
        Ok(())
    }

    fn receive(&mut self) -> Option<Message> {
        self.accept();
        self.flush();
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
        if self.client.is_none() {
            debug!("No controller connected, dropping outbound message");
            return false;
        }

        let mut line = encode_line(message);
        line.push('\n');
        if self.outbound.len() + line.len() > MAX_OUTBOUND {
            self.flush();
            if self.outbound.len() + line.len() > MAX_OUTBOUND {
                warn!(
                    pending = self.outbound.len(),
                    "Controller is not reading, dropping outbound message"
                );
                return false;
            }
        }

        self.outbound.extend_from_slice(line.as_bytes());
        self.flush();
        self.client.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
