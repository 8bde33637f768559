//! Radio mesh transport
//!
//! The mesh transport owns node addressing and multi-hop delivery. The
//! gateway only polls it for inbound messages, hands it outbound ones and
//! asks it to relay traffic that is not addressed to the gateway.
//!
//! - [`udp::UdpMesh`] - host-side radio stand-in over UDP datagrams

pub mod udp;

pub use udp::UdpMesh;

use crate::error::Result;
use crate::message::{Message, NodeId};

/// Trait for radio mesh transports
///
/// All methods are non-blocking: `receive` returns `None` when nothing is
/// pending and `send` reports acceptance for transmission, not delivery.
pub trait MeshTransport {
    /// One-time setup (open the radio, bind sockets, ...)
    fn begin(&mut self) -> Result<()>;

    /// Poll for one inbound message
    fn receive(&mut self) -> Option<Message>;

    /// Queue a message for delivery to its destination
    fn send(&mut self, message: Message) -> bool;

    /// Relay a message that passed through this node
    fn forward(&mut self, message: Message) -> bool {
        self.send(message)
    }

    /// Address of this node
    fn node_id(&self) -> NodeId;

    /// Transport name (for logging)
    fn name(&self) -> &str;
}

impl<M: MeshTransport + ?Sized> MeshTransport for Box<M> {
    fn begin(&mut self) -> Result<()> {
        (**self).begin()
    }

    fn receive(&mut self) -> Option<Message> {
        (**self).receive()
    }

    fn send(&mut self, message: Message) -> bool {
        (**self).send(message)
    }

    fn forward(&mut self, message: Message) -> bool {
        (**self).forward(message)
    }

    fn node_id(&self) -> NodeId {
        (**self).node_id()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
