//! Sensor mesh gateway core
//!
//! This crate bridges a mesh of low-power sensor nodes to a home-automation
//! controller. Messages from the mesh addressed to the gateway are written
//! to the controller; commands from the controller are routed back into the
//! mesh. The gateway also runs the inclusion window that lets new nodes join,
//! verifies signed traffic, and drives optional status LEDs.
//!
//! # Architecture
//!
//! The gateway is a polled state machine over three collaborators:
//!
//! 1. **Mesh transport** ([`MeshTransport`]) - the radio side; [`UdpMesh`]
//!    carries CBOR frames over UDP
//! 2. **Controller link** ([`ControllerLink`]) - the controller side, using a
//!    semicolon-separated line protocol over channels, serial or TCP
//! 3. **Hardware** ([`Hardware`]) - clock, GPIO and persistent storage
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use sensormesh_gateway::{BeginOptions, ChannelLink, Gateway, UdpMesh, GATEWAY_ADDRESS};
//!
//! let mesh = UdpMesh::new(GATEWAY_ADDRESS, "0.0.0.0:5003".parse().unwrap());
//! let (link, _endpoint) = ChannelLink::pair();
//!
//! let mut gateway = Gateway::new(mesh, link);
//! gateway.begin(
//!     BeginOptions::new()
//!         .callback(|msg| println!("for the gateway: {msg}"))
//!         .inclusion_duration(Duration::from_secs(60)),
//! );
//!
//! loop {
//!     gateway.process();
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//! ```
//!
//! # Features
//!
//! - `inclusion` - time-boxed inclusion window (default)
//! - `inclusion-button` - button toggling the window (default)
//! - `signing` - BLAKE3 keyed-hash signing (default)
//! - `status-leds` - rx/tx/err indicators (default)
//! - `serial` - controller link over a serial port (requires `libudev-dev` on Linux)
//! - `tcp` - controller link over TCP
//! - `full` - all controller links

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Message model and errors
pub mod error;
pub mod message;

// Collaborators
pub mod controller;
pub mod hardware;
pub mod mesh;
pub mod signing;

// Gateway
pub mod config;
pub mod gateway;
#[cfg(feature = "inclusion")]
pub mod inclusion;
#[cfg(feature = "status-leds")]
pub mod leds;
pub mod router;

// Testing utilities
pub mod test_utils;

pub use config::{
    ControllerConfig, GatewayConfig, GatewayConfigBuilder, InclusionConfig, LedConfig,
    RadioConfig, SigningConfig,
};
pub use controller::{ChannelLink, ControllerEndpoint, ControllerLink};
pub use error::{GatewayError, Result};
pub use gateway::{BeginOptions, Gateway, GatewayStats, MessageCallback, READY_MESSAGE};
pub use hardware::{Hardware, Pin, PinMode, SystemHardware};
pub use mesh::{MeshTransport, UdpMesh};
pub use message::{
    Command, InternalType, Message, NodeId, Payload, BROADCAST_ADDRESS, GATEWAY_ADDRESS,
    MAX_PAYLOAD, NODE_SENSOR_ID,
};
pub use router::{Route, SensorNode};
pub use signing::{NoSigning, Signer};

#[cfg(feature = "serial")]
pub use controller::SerialLink;
#[cfg(feature = "tcp")]
pub use controller::TcpLink;
#[cfg(feature = "inclusion-button")]
pub use inclusion::InclusionButton;
#[cfg(feature = "inclusion")]
pub use inclusion::{InclusionController, InclusionWindow};
#[cfg(feature = "status-leds")]
pub use leds::{Led, StatusLeds};
#[cfg(feature = "signing")]
pub use signing::KeyedHashSigner;

pub use config::{DEFAULT_BAUD_RATE, DEFAULT_INCLUSION_DURATION, DEFAULT_UDP_PORT};

/// Crate version, reported to the controller on request
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
