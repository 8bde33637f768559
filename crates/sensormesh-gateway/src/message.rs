//! Message types flowing between the sensor mesh and the controller
//!
//! A [`Message`] carries its routing header (sender, last hop, destination,
//! child sensor), a command class with a command-specific type byte, two
//! flags and a payload bounded at [`MAX_PAYLOAD`] bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GatewayError, Result};

/// Address of a participant in the mesh
pub type NodeId = u8;

/// Address of the gateway, which is also the controller-facing address
pub const GATEWAY_ADDRESS: NodeId = 0;

/// Address reaching every node in radio range
pub const BROADCAST_ADDRESS: NodeId = 255;

/// Child id used for node-level messages
pub const NODE_SENSOR_ID: u8 = 255;

/// Maximum payload carried by one radio message
pub const MAX_PAYLOAD: usize = 25;

/// Message class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    /// Sensor presentation sent when a node starts up
    Presentation = 0,
    /// Set a variable value
    Set = 1,
    /// Request a variable value
    Req = 2,
    /// Internal network/protocol message
    Internal = 3,
    /// Bulk data such as firmware blocks
    Stream = 4,
}

impl TryFrom<u8> for Command {
    type Error = GatewayError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Command::Presentation),
            1 => Ok(Command::Set),
            2 => Ok(Command::Req),
            3 => Ok(Command::Internal),
            4 => Ok(Command::Stream),
            other => Err(GatewayError::UnknownCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Presentation => write!(f, "presentation"),
            Command::Set => write!(f, "set"),
            Command::Req => write!(f, "req"),
            Command::Internal => write!(f, "internal"),
            Command::Stream => write!(f, "stream"),
        }
    }
}

/// Internal message types the gateway understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InternalType {
    /// Battery level report
    BatteryLevel = 0,
    /// Time request/response
    Time = 1,
    /// Library version request/response
    Version = 2,
    /// Node id request from a fresh node
    IdRequest = 3,
    /// Node id assignment
    IdResponse = 4,
    /// Inclusion mode on/off
    InclusionMode = 5,
    /// Controller configuration
    Config = 6,
    /// Parent discovery broadcast
    FindParent = 7,
    /// Parent discovery reply
    FindParentResponse = 8,
    /// Log line
    LogMessage = 9,
    /// Routing children
    Children = 10,
    /// Sketch name
    SketchName = 11,
    /// Sketch version
    SketchVersion = 12,
    /// Reboot request
    Reboot = 13,
    /// Gateway finished starting up
    GatewayReady = 14,
}

impl InternalType {
    /// Decode an internal type byte
    pub fn from_u8(value: u8) -> Option<Self> {
        let ty = match value {
            0 => InternalType::BatteryLevel,
            1 => InternalType::Time,
            2 => InternalType::Version,
            3 => InternalType::IdRequest,
            4 => InternalType::IdResponse,
            5 => InternalType::InclusionMode,
            6 => InternalType::Config,
            7 => InternalType::FindParent,
            8 => InternalType::FindParentResponse,
            9 => InternalType::LogMessage,
            10 => InternalType::Children,
            11 => InternalType::SketchName,
            12 => InternalType::SketchVersion,
            13 => InternalType::Reboot,
            14 => InternalType::GatewayReady,
            _ => return None,
        };
        Some(ty)
    }
}

/// Payload bytes, never longer than [`MAX_PAYLOAD`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload(heapless::Vec<u8, MAX_PAYLOAD>);

impl Payload {
    /// Copy bytes into a payload, rejecting oversized input
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        heapless::Vec::from_slice(bytes)
            .map(Payload)
            .map_err(|_| GatewayError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_PAYLOAD,
            })
    }

    /// Raw payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload as text, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A message in the sensor network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Node that created the message
    pub sender: NodeId,
    /// Node that transmitted the current hop
    pub last: NodeId,
    /// Final destination
    pub destination: NodeId,
    /// Child sensor on the sender or destination node
    pub child: u8,
    /// Message class
    pub command: Command,
    /// Command-specific type (variable type, internal type, ...)
    pub msg_type: u8,
    /// Sender asks the destination to echo the message back
    pub request_ack: bool,
    /// This message is the echo of an earlier one
    pub echo: bool,
    /// Payload
    payload: Payload,
    /// Signature attached by the signing layer
    #[serde(default)]
    pub signature: Option<Vec<u8>>,
}

impl Message {
    /// Create a message with an empty payload, sent from the gateway
    pub fn new(destination: NodeId, child: u8, command: Command, msg_type: u8) -> Self {
        Self {
            sender: GATEWAY_ADDRESS,
            last: GATEWAY_ADDRESS,
            destination,
            child,
            command,
            msg_type,
            request_ack: false,
            echo: false,
            payload: Payload::default(),
            signature: None,
        }
    }

    /// Create a node-level internal message
    pub fn internal(destination: NodeId, ty: InternalType) -> Self {
        Self::new(destination, NODE_SENSOR_ID, Command::Internal, ty as u8)
    }

    /// Set the sender (and last hop) of the message
    pub fn from_node(mut self, sender: NodeId) -> Self {
        self.sender = sender;
        self.last = sender;
        self
    }

    /// Request an echo from the destination
    pub fn with_ack_request(mut self, request_ack: bool) -> Self {
        self.request_ack = request_ack;
        self
    }

    /// Attach a binary payload
    pub fn with_payload(mut self, bytes: &[u8]) -> Result<Self> {
        self.payload = Payload::from_slice(bytes)?;
        Ok(self)
    }

    /// Attach a text payload
    pub fn with_text(self, text: &str) -> Result<Self> {
        self.with_payload(text.as_bytes())
    }

    /// Replace the payload
    pub fn set_payload(&mut self, payload: Payload) {
        self.payload = payload;
    }

    /// The payload
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Payload as text, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_str()
    }

    /// Whether this is an internal message
    pub fn is_internal(&self) -> bool {
        self.command == Command::Internal
    }

    /// Internal type, for internal messages with a known type byte
    pub fn internal_type(&self) -> Option<InternalType> {
        if self.is_internal() {
            InternalType::from_u8(self.msg_type)
        } else {
            None
        }
    }

    /// Whether the message is addressed to every node
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_ADDRESS
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{} (last={}) child={} {} type={} len={}",
            self.sender,
            self.destination,
            self.last,
            self.child,
            self.command,
            self.msg_type,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new(12, 1, Command::Set, 2).with_text("1").unwrap();

        assert_eq!(msg.sender, GATEWAY_ADDRESS);
        assert_eq!(msg.destination, 12);
        assert_eq!(msg.payload_str(), Some("1"));
        assert!(!msg.is_internal());
        assert!(msg.signature.is_none());
    }

    #[test]
    fn test_payload_limit() {
        assert!(Payload::from_slice(&[0u8; MAX_PAYLOAD]).is_ok());

        let err = Payload::from_slice(&[0u8; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::PayloadTooLarge { size: 26, max: 25 }
        ));
    }

    #[test]
    fn test_command_conversion() {
        assert_eq!(Command::try_from(3).unwrap(), Command::Internal);
        assert!(matches!(
            Command::try_from(5),
            Err(GatewayError::UnknownCommand(5))
        ));
    }

    #[test]
    fn test_internal_type() {
        let msg = Message::internal(GATEWAY_ADDRESS, InternalType::InclusionMode);
        assert_eq!(msg.child, NODE_SENSOR_ID);
        assert_eq!(msg.internal_type(), Some(InternalType::InclusionMode));

        let set = Message::new(GATEWAY_ADDRESS, 0, Command::Set, 5);
        assert_eq!(set.internal_type(), None);
        assert_eq!(InternalType::from_u8(42), None);
    }

    #[test]
    fn test_from_node_sets_last_hop() {
        let msg = Message::new(GATEWAY_ADDRESS, 3, Command::Set, 0).from_node(7);
        assert_eq!(msg.sender, 7);
        assert_eq!(msg.last, 7);
    }

    #[test]
    fn test_display() {
        let msg = Message::new(BROADCAST_ADDRESS, 1, Command::Req, 3).from_node(4);
        assert!(msg.is_broadcast());
        assert_eq!(msg.to_string(), "4->255 (last=4) child=1 req type=3 len=0");
    }
}
