//! UDP mesh transport
//!
//! Stands in for the radio on hosts without one: every node is a UDP socket
//! and every datagram carries one CBOR-encoded [`Message`]. Routes are
//! learned from the source address of received frames and kept in a bounded
//! LRU table, seeded with static peers from configuration.

use lru::LruCache;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::num::NonZeroUsize;
use tracing::{debug, trace, warn};

use crate::config::RadioConfig;
use crate::error::{GatewayError, Result};
use crate::mesh::MeshTransport;
use crate::message::{Message, NodeId};

/// Receive buffer size, comfortably above the largest encoded message
const RECV_BUFFER_SIZE: usize = 512;

/// Mesh transport over non-blocking UDP datagrams
pub struct UdpMesh {
    /// Address of this node
    node_id: NodeId,
    /// Local bind address
    bind: SocketAddr,
    /// Socket (when started)
    socket: Option<UdpSocket>,
    /// Routes that never expire
    static_routes: BTreeMap<NodeId, SocketAddr>,
    /// Routes learned from received frames
    learned_routes: LruCache<NodeId, SocketAddr>,
    /// Receive buffer
    recv_buffer: Vec<u8>,
    /// Transport name for logging
    name: String,
}

impl UdpMesh {
    /// Create a transport for `node_id` bound to `bind` once started
    pub fn new(node_id: NodeId, bind: SocketAddr) -> Self {
        Self::with_capacity(node_id, bind, crate::config::DEFAULT_ROUTING_TABLE_SIZE)
    }

    /// Create a transport with a custom routing table capacity
    pub fn with_capacity(node_id: NodeId, bind: SocketAddr, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            node_id,
            bind,
            socket: None,
            static_routes: BTreeMap::new(),
            learned_routes: LruCache::new(cap),
            recv_buffer: vec![0u8; RECV_BUFFER_SIZE],
            name: format!("udp:{}", bind),
        }
    }

    /// Create from radio configuration
    pub fn from_config(config: &RadioConfig) -> Self {
        let mut mesh = Self::with_capacity(config.node_id, config.bind, config.routing_table_size);
        for (&node, &addr) in &config.peers {
            mesh.static_routes.insert(node, addr);
        }
        mesh
    }

    /// Add a static route
    pub fn with_peer(mut self, node: NodeId, addr: SocketAddr) -> Self {
        self.static_routes.insert(node, addr);
        self
    }

    /// Actual bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Look up the address a node is reached through
    pub fn route(&self, node: NodeId) -> Option<SocketAddr> {
        self.learned_routes
            .peek(&node)
            .copied()
            .or_else(|| self.static_routes.get(&node).copied())
    }

    /// Number of learned routes
    pub fn learned_route_count(&self) -> usize {
        self.learned_routes.len()
    }

    fn learn(&mut self, node: NodeId, addr: SocketAddr) {
        if node == self.node_id || node == crate::message::BROADCAST_ADDRESS {
            return;
        }
        if self.learned_routes.put(node, addr) != Some(addr) {
            debug!(node, %addr, "Learned mesh route");
        }
    }

    fn encode(message: &Message) -> Result<Vec<u8>> {
        Ok(serde_cbor::to_vec(message)?)
    }

    fn decode(frame: &[u8]) -> Result<Message> {
        Ok(serde_cbor::from_slice(frame)?)
    }

    fn broadcast_targets(&self) -> Vec<SocketAddr> {
        let mut targets: Vec<SocketAddr> = self
            .static_routes
            .values()
            .copied()
            .chain(self.learned_routes.iter().map(|(_, addr)| *addr))
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

impl MeshTransport for UdpMesh {
    fn begin(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind(self.bind).map_err(|e| GatewayError::BindFailed {
            addr: self.bind.to_string(),
            reason: e.to_string(),
        })?;
        socket.set_nonblocking(true)?;

        debug!(node = self.node_id, addr = ?socket.local_addr().ok(), "UDP mesh started");
        self.socket = Some(socket);
        Ok(())
    }

    fn receive(&mut self) -> Option<Message> {
        loop {
            let socket = self.socket.as_ref()?;
            let (len, src) = match socket.recv_from(&mut self.recv_buffer) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    trace!("No mesh frame available");
                    return None;
                }
                Err(e) => {
                    warn!("Mesh receive failed: {}", e);
                    return None;
                }
            };

            match Self::decode(&self.recv_buffer[..len]) {
                Ok(message) => {
                    self.learn(message.last, src);
                    if message.sender != message.last {
                        self.learn(message.sender, src);
                    }
                    trace!(%src, %message, "Mesh frame received");
                    return Some(message);
                }
                Err(e) => {
                    warn!(%src, bytes = len, "Dropping undecodable mesh frame: {}", e);
                }
            }
        }
    }

    fn send(&mut self, mut message: Message) -> bool {
        message.last = self.node_id;

        let frame = match Self::encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode mesh frame: {}", e);
                return false;
            }
        };

        let targets = if message.is_broadcast() {
            self.broadcast_targets()
        } else {
            match self.route(message.destination) {
                Some(addr) => vec![addr],
                None => {
                    warn!("{}", GatewayError::NoRoute(message.destination));
                    return false;
                }
            }
        };

        let Some(socket) = self.socket.as_ref() else {
            warn!("{}", GatewayError::NotStarted(self.name.clone()));
            return false;
        };

        let mut accepted = false;
        for addr in targets {
            match socket.send_to(&frame, addr) {
                Ok(_) => accepted = true,
                Err(e) => warn!(%addr, "Mesh send failed: {}", e),
            }
        }
        accepted
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, BROADCAST_ADDRESS, GATEWAY_ADDRESS};
    use std::time::{Duration, Instant};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn poll(mesh: &mut UdpMesh) -> Option<Message> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(msg) = mesh.receive() {
                return Some(msg);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_receive_before_begin_is_empty() {
        let mut mesh = UdpMesh::new(GATEWAY_ADDRESS, loopback());
        assert!(mesh.receive().is_none());
        assert!(!mesh.send(Message::new(BROADCAST_ADDRESS, 0, Command::Set, 0)));
    }

    #[test]
    fn test_send_without_route_is_rejected() {
        let mut mesh = UdpMesh::new(GATEWAY_ADDRESS, loopback());
        mesh.begin().unwrap();
        assert!(!mesh.send(Message::new(9, 0, Command::Set, 0)));
    }

    #[test]
    fn test_exchange_and_route_learning() {
        let mut gateway = UdpMesh::new(GATEWAY_ADDRESS, loopback());
        gateway.begin().unwrap();
        let gateway_addr = gateway.local_addr().unwrap();

        let mut node = UdpMesh::new(5, loopback()).with_peer(GATEWAY_ADDRESS, gateway_addr);
        node.begin().unwrap();

        let reading = Message::new(GATEWAY_ADDRESS, 1, Command::Set, 0)
            .from_node(5)
            .with_text("21.5")
            .unwrap();
        assert!(node.send(reading));

        let received = poll(&mut gateway).expect("frame from node");
        assert_eq!(received.sender, 5);
        assert_eq!(received.last, 5);
        assert_eq!(received.payload_str(), Some("21.5"));
        assert_eq!(gateway.route(5), node.local_addr());

        // The learned route carries the reply back
        let reply = Message::new(5, 1, Command::Set, 2).with_text("1").unwrap();
        assert!(gateway.send(reply));
        let back = poll(&mut node).expect("reply from gateway");
        assert_eq!(back.last, GATEWAY_ADDRESS);
        assert_eq!(back.destination, 5);
    }

    #[test]
    fn test_garbage_frames_are_dropped() {
        let mut gateway = UdpMesh::new(GATEWAY_ADDRESS, loopback());
        gateway.begin().unwrap();
        let addr = gateway.local_addr().unwrap();

        let raw = UdpSocket::bind(loopback()).unwrap();
        raw.send_to(b"\xff\x00not cbor", addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert!(gateway.receive().is_none());
        assert_eq!(gateway.learned_route_count(), 0);
    }

    #[test]
    fn test_routing_table_is_bounded() {
        let mut mesh = UdpMesh::with_capacity(GATEWAY_ADDRESS, loopback(), 2);
        for node in 1..=3u8 {
            let addr: SocketAddr = format!("127.0.0.1:{}", 6000 + node as u16).parse().unwrap();
            mesh.learn(node, addr);
        }
        assert_eq!(mesh.learned_route_count(), 2);
        assert!(mesh.route(1).is_none());
        assert!(mesh.route(3).is_some());
    }
}
