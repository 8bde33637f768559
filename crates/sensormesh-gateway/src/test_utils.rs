//! Test doubles for the gateway's collaborators
//!
//! Every mock is a cheap handle over shared state: clone it, hand one copy
//! to the gateway and keep the other to inject traffic, move the clock and
//! inspect what was sent.
//!
//! # Example
//!
//! ```rust
//! use sensormesh_gateway::test_utils::{MockController, MockHardware, MockMesh};
//! use sensormesh_gateway::{BeginOptions, Gateway, Message, Command, GATEWAY_ADDRESS};
//!
//! let mesh = MockMesh::new(GATEWAY_ADDRESS);
//! let controller = MockController::new();
//! let mut gateway = Gateway::new(mesh.clone(), controller.clone())
//!     .with_hardware(MockHardware::new());
//! gateway.begin(BeginOptions::new());
//!
//! mesh.inject(Message::new(GATEWAY_ADDRESS, 1, Command::Set, 0).from_node(4));
//! assert!(gateway.process());
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::controller::ControllerLink;
use crate::error::{GatewayError, Result};
use crate::hardware::{Hardware, Pin, PinMode, STORAGE_ERASED};
use crate::mesh::MeshTransport;
use crate::message::{Message, NodeId};
use crate::signing::Signer;

#[derive(Debug, Default)]
struct HardwareState {
    now: u64,
    modes: HashMap<Pin, PinMode>,
    levels: HashMap<Pin, bool>,
    storage: HashMap<usize, u8>,
}

/// Hardware with a manual clock and settable pins
#[derive(Debug, Clone, Default)]
pub struct MockHardware {
    state: Arc<Mutex<HardwareState>>,
}

impl MockHardware {
    /// Create hardware at time zero with all inputs high
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clock
    pub fn set_time(&self, now: u64) {
        self.state.lock().now = now;
    }

    /// Move the clock forward
    pub fn advance(&self, ms: u64) {
        self.state.lock().now += ms;
    }

    /// Drive an input pin
    pub fn set_pin(&self, pin: Pin, high: bool) {
        self.state.lock().levels.insert(pin, high);
    }

    /// Current level of a pin
    pub fn pin(&self, pin: Pin) -> bool {
        self.state.lock().levels.get(&pin).copied().unwrap_or(true)
    }

    /// Configured mode of a pin
    pub fn mode(&self, pin: Pin) -> Option<PinMode> {
        self.state.lock().modes.get(&pin).copied()
    }
}

impl Hardware for MockHardware {
    fn millis(&self) -> u64 {
        self.state.lock().now
    }

    fn pin_mode(&mut self, pin: Pin, mode: PinMode) {
        self.state.lock().modes.insert(pin, mode);
    }

    fn digital_read(&self, pin: Pin) -> bool {
        self.pin(pin)
    }

    fn digital_write(&mut self, pin: Pin, high: bool) {
        self.set_pin(pin, high);
    }

    fn storage_read(&self, pos: usize) -> u8 {
        self.state
            .lock()
            .storage
            .get(&pos)
            .copied()
            .unwrap_or(STORAGE_ERASED)
    }

    fn storage_write(&mut self, pos: usize, value: u8) {
        self.state.lock().storage.insert(pos, value);
    }
}

#[derive(Debug)]
struct MeshState {
    incoming: VecDeque<Message>,
    sent: Vec<Message>,
    forwarded: Vec<Message>,
    accept: bool,
    fail_begin: bool,
    started: bool,
}

/// Mesh transport that records traffic
#[derive(Debug, Clone)]
pub struct MockMesh {
    node_id: NodeId,
    state: Arc<Mutex<MeshState>>,
}

impl MockMesh {
    /// Create a mesh for a node that accepts every send
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: Arc::new(Mutex::new(MeshState {
                incoming: VecDeque::new(),
                sent: Vec::new(),
                forwarded: Vec::new(),
                accept: true,
                fail_begin: false,
                started: false,
            })),
        }
    }

    /// Queue an inbound message
    pub fn inject(&self, message: Message) {
        self.state.lock().incoming.push_back(message);
    }

    /// Messages handed to `send`
    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().sent.clone()
    }

    /// Messages handed to `forward`
    pub fn forwarded(&self) -> Vec<Message> {
        self.state.lock().forwarded.clone()
    }

    /// Accept or reject subsequent sends
    pub fn set_accept(&self, accept: bool) {
        self.state.lock().accept = accept;
    }

    /// Make `begin` fail
    pub fn set_fail_begin(&self, fail: bool) {
        self.state.lock().fail_begin = fail;
    }

    /// Whether `begin` succeeded
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }
}

impl MeshTransport for MockMesh {
    fn begin(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_begin {
            return Err(GatewayError::NotStarted("MockMesh".to_string()));
        }
        state.started = true;
        Ok(())
    }

    fn receive(&mut self) -> Option<Message> {
        self.state.lock().incoming.pop_front()
    }

    fn send(&mut self, mut message: Message) -> bool {
        message.last = self.node_id;
        let mut state = self.state.lock();
        if state.accept {
            state.sent.push(message);
        }
        state.accept
    }

    fn forward(&mut self, mut message: Message) -> bool {
        message.last = self.node_id;
        let mut state = self.state.lock();
        if state.accept {
            state.forwarded.push(message);
        }
        state.accept
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn name(&self) -> &str {
        "MockMesh"
    }
}

#[derive(Debug)]
struct ControllerState {
    incoming: VecDeque<Message>,
    sent: Vec<Message>,
    accept: bool,
    started: bool,
}

/// Controller link that records traffic
#[derive(Debug, Clone)]
pub struct MockController {
    state: Arc<Mutex<ControllerState>>,
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl MockController {
    /// Create a link that accepts every write
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState {
                incoming: VecDeque::new(),
                sent: Vec::new(),
                accept: true,
                started: false,
            })),
        }
    }

    /// Queue a command from the controller
    pub fn inject(&self, message: Message) {
        self.state.lock().incoming.push_back(message);
    }

    /// Messages written to the controller
    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().sent.clone()
    }

    /// Forget recorded writes
    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Accept or reject subsequent writes
    pub fn set_accept(&self, accept: bool) {
        self.state.lock().accept = accept;
    }

    /// Whether `begin` was called
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }
}

impl ControllerLink for MockController {
    fn begin(&mut self) -> Result<()> {
        self.state.lock().started = true;
        Ok(())
    }

    fn receive(&mut self) -> Option<Message> {
        self.state.lock().incoming.pop_front()
    }

    fn send(&mut self, message: &Message) -> bool {
        let mut state = self.state.lock();
        if state.accept {
            state.sent.push(message.clone());
        }
        state.accept
    }

    fn name(&self) -> &str {
        "MockController"
    }
}

/// Signer that rejects every inbound message
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectingSigner;

impl Signer for RejectingSigner {
    fn sign(&mut self, message: Message) -> Message {
        message
    }

    fn verify(&self, _message: &Message) -> bool {
        false
    }

    fn name(&self) -> &str {
        "rejecting"
    }
}
