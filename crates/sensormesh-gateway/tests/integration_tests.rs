//! Integration tests for the sensor mesh gateway
//!
//! These tests drive a full gateway through its public surface:
//! - Inclusion window timing, button toggling and controller commands
//! - Routing between controller and mesh
//! - `process()` return semantics and callback delivery
//! - Signature verification on inbound traffic
//! - End-to-end traffic over UDP and the channel controller link

#![cfg(all(feature = "inclusion-button", feature = "signing"))]

use parking_lot::Mutex;
use sensormesh_gateway::test_utils::{MockController, MockHardware, MockMesh, RejectingSigner};
use sensormesh_gateway::{
    BeginOptions, ChannelLink, Command, ControllerLink, Gateway, InternalType, KeyedHashSigner,
    MeshTransport, Message, Route, Signer, UdpMesh, BROADCAST_ADDRESS, GATEWAY_ADDRESS,
    READY_MESSAGE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    gateway: Gateway<MockMesh, MockController, MockHardware>,
    mesh: MockMesh,
    controller: MockController,
    hw: MockHardware,
    delivered: Arc<Mutex<Vec<Message>>>,
}

impl Fixture {
    fn new() -> Self {
        let mesh = MockMesh::new(GATEWAY_ADDRESS);
        let controller = MockController::new();
        let hw = MockHardware::new();
        let gateway =
            Gateway::new(mesh.clone(), controller.clone()).with_hardware(hw.clone());
        Self {
            gateway,
            mesh,
            controller,
            hw,
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Begin with a recording callback and the given extra options
    fn begin(&mut self, configure: impl FnOnce(BeginOptions) -> BeginOptions) {
        let delivered = self.delivered.clone();
        let options = BeginOptions::new().callback(move |msg| delivered.lock().push(msg.clone()));
        self.gateway.begin(configure(options));
    }

    fn delivered(&self) -> Vec<Message> {
        self.delivered.lock().clone()
    }

    /// Inclusion notifications sent to the controller, in order
    fn inclusion_notifications(&self) -> Vec<String> {
        self.controller
            .sent()
            .iter()
            .filter(|m| m.internal_type() == Some(InternalType::InclusionMode))
            .filter_map(|m| m.payload_str().map(str::to_string))
            .collect()
    }
}

fn reading(from: u8, to: u8) -> Message {
    Message::new(to, 1, Command::Set, 0)
        .from_node(from)
        .with_text("21.5")
        .unwrap()
}

// ============================================================================
// Inclusion window
// ============================================================================

#[test]
fn test_begin_with_duration_scenario() {
    let mut fx = Fixture::new();
    fx.begin(|o| o.inclusion_duration(Duration::from_millis(60_000)));

    for t in [0, 1, 30_000, 59_999] {
        fx.hw.set_time(t);
        fx.gateway.process();
        assert!(fx.gateway.is_inclusion_mode(), "inactive at t={}", t);
    }

    fx.hw.set_time(60_000);
    fx.gateway.process();
    assert!(!fx.gateway.is_inclusion_mode());

    fx.hw.set_time(120_000);
    fx.gateway.process();
    assert!(!fx.gateway.is_inclusion_mode());

    assert_eq!(fx.inclusion_notifications(), vec!["1", "0"]);
}

#[test]
fn test_window_holds_for_exactly_its_duration() {
    for duration in [1u64, 250, 5_000, 60_000] {
        let mut fx = Fixture::new();
        fx.begin(|o| o.inclusion_duration(Duration::from_millis(duration)));
        fx.gateway.set_inclusion_mode(false);

        let start = 1_000_000;
        fx.hw.set_time(start);
        fx.gateway.set_inclusion_mode(true);

        for offset in [0, duration / 2, duration - 1] {
            fx.hw.set_time(start + offset);
            fx.gateway.process();
            assert!(fx.gateway.is_inclusion_mode(), "D={} offset={}", duration, offset);
        }

        fx.hw.set_time(start + duration);
        fx.gateway.process();
        assert!(!fx.gateway.is_inclusion_mode(), "D={} still active", duration);
    }
}

#[test]
fn test_zero_duration_is_inert() {
    let mut fx = Fixture::new();
    fx.begin(|o| o.inclusion_duration(Duration::ZERO));
    assert!(!fx.gateway.is_inclusion_mode());

    fx.gateway.set_inclusion_mode(true);
    fx.hw.set_time(u64::MAX / 2);
    fx.gateway.process();
    assert!(fx.gateway.is_inclusion_mode());

    fx.gateway.set_inclusion_mode(false);
    assert!(!fx.gateway.is_inclusion_mode());
    assert_eq!(fx.inclusion_notifications(), vec!["1", "0"]);
}

#[test]
fn test_redundant_requests_do_not_notify() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);

    fx.gateway.set_inclusion_mode(true);
    fx.gateway.set_inclusion_mode(true);
    fx.gateway.set_inclusion_mode(false);
    fx.gateway.set_inclusion_mode(false);
    assert_eq!(fx.inclusion_notifications(), vec!["1", "0"]);
}

/// Press and release the button, polling through the debounce interval
fn press_button(fx: &mut Fixture, pin: u8, at: u64) {
    fx.hw.set_time(at);
    fx.hw.set_pin(pin, false);
    fx.gateway.process();
    fx.hw.set_time(at + 50);
    fx.gateway.process();

    fx.hw.set_time(at + 100);
    fx.hw.set_pin(pin, true);
    fx.gateway.process();
    fx.hw.set_time(at + 150);
    fx.gateway.process();
}

#[test]
fn test_button_toggle_law() {
    let mut fx = Fixture::new();
    fx.begin(|o| o.inclusion_button(3, Duration::from_millis(50)));
    assert!(!fx.gateway.is_inclusion_mode());

    press_button(&mut fx, 3, 1_000);
    assert!(fx.gateway.is_inclusion_mode());

    press_button(&mut fx, 3, 2_000);
    assert!(!fx.gateway.is_inclusion_mode());

    assert_eq!(fx.inclusion_notifications(), vec!["1", "0"]);
}

#[test]
fn test_button_press_while_enabled_disables() {
    let mut fx = Fixture::new();
    fx.begin(|o| {
        o.inclusion_duration(Duration::from_millis(60_000))
            .inclusion_button(3, Duration::from_millis(50))
    });
    assert!(fx.gateway.is_inclusion_mode());

    press_button(&mut fx, 3, 10_000);
    assert!(!fx.gateway.is_inclusion_mode());

    // No timeout fires later for the closed window
    fx.hw.set_time(70_000);
    fx.gateway.process();
    assert_eq!(fx.inclusion_notifications(), vec!["1", "0"]);
}

#[test]
fn test_button_bounce_is_ignored() {
    let mut fx = Fixture::new();
    fx.begin(|o| o.inclusion_button(3, Duration::from_millis(50)));

    for (t, level) in [(100, false), (110, true), (120, false), (130, true), (200, true)] {
        fx.hw.set_time(t);
        fx.hw.set_pin(3, level);
        fx.gateway.process();
    }
    assert!(!fx.gateway.is_inclusion_mode());
}

#[test]
fn test_controller_inclusion_command() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);

    let enable = Message::internal(GATEWAY_ADDRESS, InternalType::InclusionMode)
        .with_text("1")
        .unwrap();
    fx.controller.inject(enable);
    assert!(!fx.gateway.process());
    assert!(fx.gateway.is_inclusion_mode());

    let disable = Message::internal(GATEWAY_ADDRESS, InternalType::InclusionMode)
        .with_text("0")
        .unwrap();
    fx.controller.inject(disable);
    fx.gateway.process();
    assert!(!fx.gateway.is_inclusion_mode());

    assert_eq!(fx.inclusion_notifications(), vec!["1", "0"]);
    assert!(fx.mesh.sent().is_empty());
    assert!(fx.delivered().is_empty());
}

// ============================================================================
// Routing
// ============================================================================

#[test]
fn test_send_route_to_controller() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);
    fx.controller.clear_sent();

    let msg = reading(7, GATEWAY_ADDRESS);
    assert!(fx.gateway.send_route(msg.clone()));

    assert_eq!(fx.controller.sent(), vec![msg]);
    assert!(fx.mesh.sent().is_empty());
    assert!(fx.mesh.forwarded().is_empty());
}

#[test]
fn test_send_route_into_mesh() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);
    fx.controller.clear_sent();

    for destination in [1u8, 7, 42, 255] {
        assert!(Route::send_route(&mut fx.gateway, reading(GATEWAY_ADDRESS, destination)));
    }

    assert!(fx.controller.sent().is_empty());
    let destinations: Vec<u8> = fx.mesh.sent().iter().map(|m| m.destination).collect();
    assert_eq!(destinations, vec![1, 7, 42, 255]);
    assert_eq!(fx.gateway.stats().sent_to_mesh, 4);
}

#[test]
fn test_send_route_reports_rejection() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);

    fx.mesh.set_accept(false);
    assert!(!fx.gateway.send_route(reading(GATEWAY_ADDRESS, 9)));

    fx.controller.set_accept(false);
    assert!(!fx.gateway.send_route(reading(9, GATEWAY_ADDRESS)));

    assert_eq!(fx.gateway.stats().send_failures, 2);
}

#[test]
fn test_controller_command_goes_to_mesh() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);

    let switch_on = Message::new(5, 2, Command::Set, 2).with_text("1").unwrap();
    fx.controller.inject(switch_on);
    assert!(!fx.gateway.process());

    let sent = fx.mesh.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination, 5);
    assert_eq!(sent[0].sender, GATEWAY_ADDRESS);
    assert_eq!(sent[0].payload_str(), Some("1"));
    assert_eq!(fx.gateway.stats().controller_received, 1);
}

#[test]
fn test_controller_message_for_gateway_sensor() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);

    let msg = Message::new(GATEWAY_ADDRESS, 4, Command::Set, 2).with_text("1").unwrap();
    fx.controller.inject(msg);

    // Delivered to the callback but not counted as mesh traffic
    assert!(!fx.gateway.process());
    assert_eq!(fx.delivered().len(), 1);
    assert_eq!(fx.delivered()[0].child, 4);
    assert!(fx.mesh.sent().is_empty());
}

// ============================================================================
// process() return value
// ============================================================================

#[test]
fn test_process_true_only_for_local_mesh_delivery() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);
    fx.controller.clear_sent();

    // Nothing pending
    assert!(!fx.gateway.process());

    // For the gateway
    let msg = reading(4, GATEWAY_ADDRESS);
    fx.mesh.inject(msg.clone());
    assert!(fx.gateway.process());
    assert_eq!(fx.delivered(), vec![msg.clone()]);
    assert_eq!(fx.controller.sent(), vec![msg]);

    // For another node: relayed, not delivered
    fx.mesh.inject(reading(4, 9));
    assert!(!fx.gateway.process());
    assert_eq!(fx.mesh.forwarded().len(), 1);
    assert_eq!(fx.mesh.forwarded()[0].destination, 9);
    assert_eq!(fx.delivered().len(), 1);
    assert_eq!(fx.controller.sent().len(), 1);

    let stats = fx.gateway.stats();
    assert_eq!(stats.mesh_received, 2);
    assert_eq!(stats.relayed, 1);
    assert_eq!(stats.delivered_locally, 1);
}

#[test]
fn test_only_traffic_passing_through_is_relayed() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);

    // A node looking for its parent
    fx.mesh
        .inject(Message::internal(BROADCAST_ADDRESS, InternalType::FindParent).from_node(5));
    assert!(!fx.gateway.process());

    // Bounced back by its own destination
    let mut bounced = reading(4, 9);
    bounced.last = 9;
    fx.mesh.inject(bounced);
    assert!(!fx.gateway.process());

    // Our own traffic looping back
    fx.mesh.inject(reading(GATEWAY_ADDRESS, 9));
    assert!(!fx.gateway.process());

    assert!(fx.mesh.forwarded().is_empty());
    assert!(fx.delivered().is_empty());
    let stats = fx.gateway.stats();
    assert_eq!(stats.relayed, 0);
    assert_eq!(stats.not_relayed, 3);

    // A child handing over traffic for another node
    let mut via_child = reading(4, 9);
    via_child.last = 6;
    fx.mesh.inject(via_child);
    assert!(!fx.gateway.process());
    assert_eq!(fx.mesh.forwarded().len(), 1);
    assert_eq!(fx.gateway.stats().relayed, 1);
}

#[test]
fn test_mesh_payload_cannot_forge_controller_lines() {
    let (link, mut endpoint) = ChannelLink::pair();
    let mesh = MockMesh::new(GATEWAY_ADDRESS);
    let mut gateway = Gateway::new(mesh.clone(), link).with_hardware(MockHardware::new());
    gateway.begin(BeginOptions::new());
    endpoint.drain_lines();

    let forged = Message::new(GATEWAY_ADDRESS, 1, Command::Set, 0)
        .from_node(9)
        .with_text("1\n0;255;3;0;5;1")
        .unwrap();
    mesh.inject(forged);
    assert!(gateway.process());

    let lines = endpoint.drain_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("9;1;1;0;0;"));
    assert!(!lines[0].contains(['\n', '\r']));
    assert!(!gateway.is_inclusion_mode());
}

#[test]
fn test_process_true_without_callback() {
    let mesh = MockMesh::new(GATEWAY_ADDRESS);
    let controller = MockController::new();
    let mut gateway =
        Gateway::new(mesh.clone(), controller.clone()).with_hardware(MockHardware::new());
    gateway.begin(BeginOptions::new());

    mesh.inject(reading(3, GATEWAY_ADDRESS));
    assert!(gateway.process());
    assert_eq!(gateway.stats().delivered_locally, 0);
    assert_eq!(controller.sent().len(), 2);
}

#[test]
fn test_one_message_per_source_per_step() {
    let mut fx = Fixture::new();
    fx.begin(|o| o);

    fx.mesh.inject(reading(4, GATEWAY_ADDRESS));
    fx.mesh.inject(reading(5, GATEWAY_ADDRESS));

    assert!(fx.gateway.process());
    assert_eq!(fx.delivered().len(), 1);
    assert!(fx.gateway.process());
    assert_eq!(fx.delivered().len(), 2);
    assert!(!fx.gateway.process());
}

#[test]
fn test_non_gateway_node_address() {
    let mesh = MockMesh::new(10);
    let controller = MockController::new();
    let mut gateway =
        Gateway::new(mesh.clone(), controller.clone()).with_hardware(MockHardware::new());
    gateway.begin(BeginOptions::new());
    assert_eq!(gateway.node_id(), 10);

    mesh.inject(reading(4, GATEWAY_ADDRESS));
    assert!(!gateway.process());
    mesh.inject(reading(4, 10));
    assert!(gateway.process());
}

// ============================================================================
// Signing
// ============================================================================

#[test]
fn test_verification_failure_drops_message() {
    let mesh = MockMesh::new(GATEWAY_ADDRESS);
    let controller = MockController::new();
    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();

    let mut gateway = Gateway::new(mesh.clone(), controller.clone())
        .with_hardware(MockHardware::new())
        .with_signer(RejectingSigner);
    gateway.begin(BeginOptions::new().callback(move |_| *counter.lock() += 1));
    controller.clear_sent();

    mesh.inject(reading(4, GATEWAY_ADDRESS));
    assert!(!gateway.process());

    assert_eq!(*calls.lock(), 0);
    assert!(controller.sent().is_empty());
    assert_eq!(gateway.stats().signature_failures, 1);

    // Relay traffic is dropped too
    mesh.inject(reading(4, 9));
    assert!(!gateway.process());
    assert!(mesh.forwarded().is_empty());

    // And so is a locally routed message
    assert!(!gateway.send_route(reading(4, GATEWAY_ADDRESS)));
    assert!(controller.sent().is_empty());
}

#[test]
fn test_keyed_signing_end_to_end() {
    let key = [0x5Au8; 32];
    let mesh = MockMesh::new(GATEWAY_ADDRESS);
    let controller = MockController::new();
    let mut gateway = Gateway::new(mesh.clone(), controller.clone())
        .with_hardware(MockHardware::new())
        .with_signer(KeyedHashSigner::new(key).require_signed(true));
    gateway.begin(BeginOptions::new());

    // Node sharing the key
    let mut node_signer = KeyedHashSigner::new(key);
    mesh.inject(node_signer.sign(reading(4, GATEWAY_ADDRESS)));
    assert!(gateway.process());

    // Node with a different key
    let mut intruder = KeyedHashSigner::new([0x11u8; 32]);
    mesh.inject(intruder.sign(reading(6, GATEWAY_ADDRESS)));
    assert!(!gateway.process());

    // Unsigned
    mesh.inject(reading(4, GATEWAY_ADDRESS));
    assert!(!gateway.process());
    assert_eq!(gateway.stats().signature_failures, 2);

    // Outbound traffic carries a signature the node accepts
    controller.inject(Message::new(4, 1, Command::Set, 2).with_text("0").unwrap());
    gateway.process();
    let sent = mesh.sent();
    assert_eq!(sent.len(), 1);
    assert!(node_signer.verify(&sent[0]));
}

// ============================================================================
// End-to-end over real transports
// ============================================================================

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn poll_until<T>(mut f: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if let Some(value) = f() {
            return Some(value);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn test_udp_mesh_to_channel_controller() {
    let (link, mut endpoint) = ChannelLink::pair();
    let mut gateway = Gateway::new(UdpMesh::new(GATEWAY_ADDRESS, loopback()), link);
    gateway.begin(BeginOptions::new());
    let gateway_addr = gateway.mesh().local_addr().unwrap();

    assert_eq!(
        endpoint.try_recv_line().as_deref(),
        Some(format!("0;255;3;0;14;{}", READY_MESSAGE).as_str())
    );

    let mut node = UdpMesh::new(5, loopback()).with_peer(GATEWAY_ADDRESS, gateway_addr);
    node.begin().unwrap();
    assert!(node.send(reading(5, GATEWAY_ADDRESS)));

    assert_eq!(poll_until(|| gateway.process().then_some(())), Some(()));
    assert_eq!(endpoint.try_recv_line().as_deref(), Some("5;1;1;0;0;21.5"));

    // The controller answers; the gateway learned the route to node 5
    endpoint.send_line("5;1;1;0;2;1").unwrap();
    gateway.process();
    let reply = poll_until(|| node.receive()).expect("reply reaches node");
    assert_eq!(reply.destination, 5);
    assert_eq!(reply.last, GATEWAY_ADDRESS);
    assert_eq!(reply.payload_str(), Some("1"));
}

#[test]
fn test_udp_broadcast_is_not_echoed_to_sender() {
    let (link, _endpoint) = ChannelLink::pair();
    let mut gateway = Gateway::new(UdpMesh::new(GATEWAY_ADDRESS, loopback()), link);
    gateway.begin(BeginOptions::new());
    let gateway_addr = gateway.mesh().local_addr().unwrap();

    let mut node = UdpMesh::new(5, loopback()).with_peer(GATEWAY_ADDRESS, gateway_addr);
    node.begin().unwrap();
    assert!(node.send(Message::internal(BROADCAST_ADDRESS, InternalType::FindParent).from_node(5)));

    assert!(poll_until(|| {
        gateway.process();
        (gateway.stats().mesh_received > 0).then_some(())
    })
    .is_some());
    assert_eq!(gateway.stats().relayed, 0);

    std::thread::sleep(Duration::from_millis(50));
    assert!(node.receive().is_none());
}

#[test]
fn test_channel_link_version_request() {
    let (mut link, mut endpoint) = ChannelLink::pair();
    link.begin().unwrap();
    let mut gateway =
        Gateway::new(MockMesh::new(GATEWAY_ADDRESS), link).with_hardware(MockHardware::new());
    gateway.begin(BeginOptions::new());
    endpoint.drain_lines();

    endpoint.send_line("0;255;3;0;2;").unwrap();
    gateway.process();
    assert_eq!(
        endpoint.try_recv_line(),
        Some(format!("0;255;3;0;2;{}", sensormesh_gateway::VERSION))
    );
}
