//! In-process controller link
//!
//! Lines travel over unbounded tokio channels, so the gateway side polls with
//! `try_recv` and never needs a runtime. The other end, a
//! [`ControllerEndpoint`], is driven by whatever carries the lines: stdio
//! tasks in the node binary, or the test itself.

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::controller::protocol::{encode_line, parse_line};
use crate::controller::ControllerLink;
use crate::error::{GatewayError, Result};
use crate::message::Message;

/// Controller link over in-process line channels
pub struct ChannelLink {
    /// Lines from the controller
    inbound: UnboundedReceiver<String>,
    /// Lines to the controller
    outbound: UnboundedSender<String>,
    /// Whether the inbound side has been reported closed
    closed: bool,
    /// Link name for logging
    name: String,
}

/// Controller side of a [`ChannelLink`]
#[derive(Debug)]
pub struct ControllerEndpoint {
    commands: UnboundedSender<String>,
    responses: UnboundedReceiver<String>,
}

impl ChannelLink {
    /// Create a connected link/endpoint pair
    pub fn pair() -> (Self, ControllerEndpoint) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let link = Self::new(command_rx, response_tx);
        let endpoint = ControllerEndpoint {
            commands: command_tx,
            responses: response_rx,
        };
        (link, endpoint)
    }

    /// Create a link from existing channel halves
    pub fn new(inbound: UnboundedReceiver<String>, outbound: UnboundedSender<String>) -> Self {
        Self {
            inbound,
            outbound,
            closed: false,
            name: "channel".to_string(),
        }
    }

    /// Set the link name used in logs
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl ControllerLink for ChannelLink {
    fn begin(&mut self) -> Result<()> {
        debug!(link = %self.name, "Channel controller link ready");
        Ok(())
    }

    fn receive(&mut self) -> Option<Message> {
        loop {
            match self.inbound.try_recv() {
                Ok(line) => match parse_line(&line) {
                    Ok(message) => return Some(message),
                    Err(e) => warn!(link = %self.name, "Ignoring controller line: {}", e),
                },
                Err(TryRecvError::Empty) => {
                    trace!("No controller line available");
                    return None;
                }
                Err(TryRecvError::Disconnected) => {
                    if !std::mem::replace(&mut self.closed, true) {
                        warn!(link = %self.name, "Controller input closed");
                    }
                    return None;
                }
            }
        }
    }

    fn send(&mut self, message: &Message) -> bool {
        self.outbound.send(encode_line(message)).is_ok()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl ControllerEndpoint {
    /// Queue a command line for the gateway
    pub fn send_line(&self, line: impl Into<String>) -> Result<()> {
        self.commands
            .send(line.into())
            .map_err(|_| GatewayError::Disconnected)
    }

    /// Take one line written by the gateway, if any
    pub fn try_recv_line(&mut self) -> Option<String> {
        self.responses.try_recv().ok()
    }

    /// Take every line written by the gateway so far
    pub fn drain_lines(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_recv_line()).collect()
    }

    /// Split into the raw channel halves
    pub fn into_parts(self) -> (UnboundedSender<String>, UnboundedReceiver<String>) {
        (self.commands, self.responses)
    }
}
