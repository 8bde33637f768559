//! The gateway core
//!
//! A [`Gateway`] sits between the sensor mesh and the home-automation
//! controller. Each call to [`Gateway::process`] performs one bounded step:
//!
//! 1. poll the inclusion window (button and timeout) and report changes
//! 2. take at most one command from the controller and route it
//! 3. take at most one message from the mesh, verify it, then either
//!    deliver it to the controller or relay it onwards
//! 4. refresh the status LEDs
//!
//! Nothing blocks: transports are polled and the host decides how often to
//! call `process`.

#[cfg(feature = "inclusion")]
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::controller::ControllerLink;
use crate::hardware::{Hardware, SystemHardware};
#[cfg(feature = "inclusion-button")]
use crate::hardware::Pin;
#[cfg(feature = "inclusion-button")]
use crate::inclusion::InclusionButton;
#[cfg(feature = "inclusion")]
use crate::inclusion::InclusionController;
#[cfg(feature = "status-leds")]
use crate::leds::{Led, StatusLeds};
use crate::mesh::MeshTransport;
use crate::message::{InternalType, Message, NodeId};
use crate::router::{Route, SensorNode};
#[cfg(feature = "signing")]
use crate::signing::Signer;
use crate::VERSION;

/// Text sent to the controller once the gateway is up
pub const READY_MESSAGE: &str = "Gateway startup complete.";

/// Callback invoked for every message addressed to the gateway itself
pub type MessageCallback = Box<dyn FnMut(&Message) + Send>;

/// Counters kept by the gateway
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStats {
    /// Messages taken from the mesh
    pub mesh_received: u64,
    /// Messages taken from the controller
    pub controller_received: u64,
    /// Messages written to the controller
    pub delivered_to_controller: u64,
    /// Messages handed to the local callback
    pub delivered_locally: u64,
    /// Mesh messages relayed towards another node
    pub relayed: u64,
    /// Mesh messages for other nodes that did not arrive here for relay
    pub not_relayed: u64,
    /// Messages sent into the mesh
    pub sent_to_mesh: u64,
    /// Sends rejected by a transport
    pub send_failures: u64,
    /// Inbound messages dropped by verification
    pub signature_failures: u64,
    /// Internal commands handled by the gateway
    pub internal_commands: u64,
}

/// Options for [`Gateway::begin`]
pub struct BeginOptions {
    callback: Option<MessageCallback>,
    #[cfg(feature = "inclusion")]
    inclusion_duration: Duration,
    #[cfg(feature = "inclusion-button")]
    inclusion_button: Option<(Pin, Duration)>,
}

impl Default for BeginOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BeginOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("BeginOptions");
        s.field("callback", &self.callback.is_some());
        #[cfg(feature = "inclusion")]
        s.field("inclusion_duration", &self.inclusion_duration);
        #[cfg(feature = "inclusion-button")]
        s.field("inclusion_button", &self.inclusion_button);
        s.finish()
    }
}

impl BeginOptions {
    /// No callback, no automatic inclusion window
    pub fn new() -> Self {
        Self {
            callback: None,
            #[cfg(feature = "inclusion")]
            inclusion_duration: Duration::ZERO,
            #[cfg(feature = "inclusion-button")]
            inclusion_button: None,
        }
    }

    /// Receive messages addressed to the gateway
    pub fn callback(mut self, callback: impl FnMut(&Message) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Open the inclusion window at startup and close it after `duration`
    ///
    /// Zero leaves the window closed and disables the timeout.
    #[cfg(feature = "inclusion")]
    pub fn inclusion_duration(mut self, duration: Duration) -> Self {
        self.inclusion_duration = duration;
        self
    }

    /// Toggle the inclusion window with an active-low button on `pin`
    #[cfg(feature = "inclusion-button")]
    pub fn inclusion_button(mut self, pin: Pin, debounce: Duration) -> Self {
        self.inclusion_button = Some((pin, debounce));
        self
    }

    /// Take the inclusion settings from configuration
    pub fn from_config(config: &crate::config::GatewayConfig) -> Self {
        #[allow(unused_mut)]
        let mut options = Self::new();
        #[cfg(feature = "inclusion")]
        {
            options = options.inclusion_duration(config.inclusion.duration);
        }
        #[cfg(feature = "inclusion-button")]
        if let Some(pin) = config.inclusion.button_pin {
            options = options.inclusion_button(pin, config.inclusion.debounce);
        }
        #[cfg(not(feature = "inclusion"))]
        let _ = config;
        options
    }
}

#[derive(Debug, Clone, Copy)]
enum Activity {
    Rx,
    Tx,
    Err,
}

/// Bridge between the sensor mesh and the controller
pub struct Gateway<M, C, H = SystemHardware> {
    node: SensorNode<M>,
    controller: C,
    hardware: H,
    callback: Option<MessageCallback>,
    #[cfg(feature = "inclusion")]
    inclusion: InclusionController,
    #[cfg(feature = "status-leds")]
    leds: Option<StatusLeds>,
    stats: GatewayStats,
    started: bool,
    warned_not_started: bool,
}

impl<M, C> Gateway<M, C, SystemHardware>
where
    M: MeshTransport,
    C: ControllerLink,
{
    /// Create a gateway on the host's hardware
    pub fn new(mesh: M, controller: C) -> Self {
        Self {
            node: SensorNode::new(mesh),
            controller,
            hardware: SystemHardware::new(),
            callback: None,
            #[cfg(feature = "inclusion")]
            inclusion: InclusionController::default(),
            #[cfg(feature = "status-leds")]
            leds: None,
            stats: GatewayStats::default(),
            started: false,
            warned_not_started: false,
        }
    }
}

impl<M, C, H> Gateway<M, C, H>
where
    M: MeshTransport,
    C: ControllerLink,
    H: Hardware,
{
    /// Run on different hardware
    pub fn with_hardware<H2: Hardware>(self, hardware: H2) -> Gateway<M, C, H2> {
        Gateway {
            node: self.node,
            controller: self.controller,
            hardware,
            callback: self.callback,
            #[cfg(feature = "inclusion")]
            inclusion: self.inclusion,
            #[cfg(feature = "status-leds")]
            leds: self.leds,
            stats: self.stats,
            started: self.started,
            warned_not_started: self.warned_not_started,
        }
    }

    /// Sign outbound and verify inbound mesh traffic
    #[cfg(feature = "signing")]
    pub fn with_signer(mut self, signer: impl Signer + Send + 'static) -> Self {
        self.node.set_signer(signer);
        self
    }

    /// Drive rx/tx/err indicators
    #[cfg(feature = "status-leds")]
    pub fn with_status_leds(mut self, leds: StatusLeds) -> Self {
        self.leds = Some(leds);
        self
    }

    /// Start the transports and announce the gateway to the controller
    ///
    /// Transport failures are logged, not returned: the gateway keeps
    /// running so it can recover when the link comes back. Calling `begin`
    /// a second time has no effect.
    pub fn begin(&mut self, options: BeginOptions) {
        if self.started {
            warn!("Gateway already started, ignoring begin");
            return;
        }

        self.callback = options.callback;

        #[cfg(feature = "inclusion")]
        {
            #[allow(unused_mut)]
            let mut inclusion = InclusionController::new(options.inclusion_duration);
            #[cfg(feature = "inclusion-button")]
            if let Some((pin, debounce)) = options.inclusion_button {
                inclusion = inclusion.with_button(InclusionButton::new(pin, debounce));
            }
            self.inclusion = inclusion;
        }

        #[cfg(feature = "status-leds")]
        if let Some(leds) = self.leds.as_mut() {
            leds.begin(&mut self.hardware);
        }

        let mesh_name = self.node.mesh().name().to_string();
        if let Err(e) = self.node.mesh_mut().begin() {
            error!(mesh = %mesh_name, error = %e, "Mesh transport failed to start");
        }
        if let Err(e) = self.controller.begin() {
            error!(controller = self.controller.name(), error = %e, "Controller link failed to start");
        }

        self.started = true;
        info!(
            node_id = self.node_id(),
            mesh = %mesh_name,
            controller = self.controller.name(),
            "Gateway started"
        );

        self.send_internal(InternalType::GatewayReady, READY_MESSAGE);

        #[cfg(feature = "inclusion")]
        if let Some(enabled) = self.inclusion.begin(&mut self.hardware) {
            self.notify_inclusion(enabled);
        }
    }

    /// Perform one step of work
    ///
    /// Returns true when a message from the mesh addressed to this gateway
    /// was received in this step. Returns false before [`Gateway::begin`].
    pub fn process(&mut self) -> bool {
        if !self.started {
            if !std::mem::replace(&mut self.warned_not_started, true) {
                warn!("process called before begin");
            }
            return false;
        }

        #[cfg(feature = "inclusion")]
        if let Some(enabled) = self.inclusion.poll(&self.hardware) {
            self.notify_inclusion(enabled);
        }

        if let Some(message) = self.controller.receive() {
            self.stats.controller_received += 1;
            self.indicate(Activity::Rx);
            self.handle_controller_message(message);
        }

        let mut delivered = false;
        if let Some(message) = self.node.mesh_mut().receive() {
            self.stats.mesh_received += 1;
            self.indicate(Activity::Rx);
            delivered = self.handle_mesh_message(message);
        }

        #[cfg(feature = "status-leds")]
        if let Some(leds) = self.leds.as_mut() {
            leds.update(&mut self.hardware);
        }

        delivered
    }

    /// Route a message: to the controller if addressed to this gateway,
    /// otherwise into the mesh
    pub fn send_route(&mut self, message: Message) -> bool {
        let accepted = if message.destination == self.node_id() {
            if !self.node.verify(&message) {
                self.reject(&message);
                return false;
            }
            let ok = self.controller.send(&message);
            if ok {
                self.stats.delivered_to_controller += 1;
            }
            ok
        } else {
            let ok = self.node.send_route(message);
            if ok {
                self.stats.sent_to_mesh += 1;
            }
            ok
        };

        self.record_send(accepted);
        accepted
    }

    /// Open or close the inclusion window
    ///
    /// The controller is told about the new state only if it changed.
    #[cfg(feature = "inclusion")]
    pub fn set_inclusion_mode(&mut self, enabled: bool) {
        let now = self.hardware.millis();
        if let Some(state) = self.inclusion.set(enabled, now) {
            self.notify_inclusion(state);
        }
    }

    /// Whether the inclusion window is open
    #[cfg(feature = "inclusion")]
    pub fn is_inclusion_mode(&self) -> bool {
        self.inclusion.is_active()
    }

    /// Inclusion state machine
    #[cfg(feature = "inclusion")]
    pub fn inclusion(&self) -> &InclusionController {
        &self.inclusion
    }

    /// Status indicators, if attached
    #[cfg(feature = "status-leds")]
    pub fn status_leds(&self) -> Option<&StatusLeds> {
        self.leds.as_ref()
    }

    /// Address of this gateway in the mesh
    pub fn node_id(&self) -> NodeId {
        self.node.node_id()
    }

    /// Whether `begin` has run
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Counters
    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    /// The mesh transport
    pub fn mesh(&self) -> &M {
        self.node.mesh()
    }

    /// The controller link
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// The hardware
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// The hardware, mutably
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    fn handle_controller_message(&mut self, mut message: Message) {
        let local = self.node_id();
        // Commands from the controller originate at the gateway
        message.sender = local;
        message.last = local;

        if message.destination != local {
            debug!(%message, "Routing controller command into the mesh");
            self.send_route(message);
            return;
        }

        if message.is_internal() {
            self.handle_internal(&message);
        } else {
            self.dispatch(&message);
        }
    }

    fn handle_internal(&mut self, message: &Message) {
        self.stats.internal_commands += 1;
        match message.internal_type() {
            #[cfg(feature = "inclusion")]
            Some(InternalType::InclusionMode) => {
                let enable = message.payload_str().map(str::trim) == Some("1");
                self.set_inclusion_mode(enable);
            }
            Some(InternalType::Version) => {
                self.send_internal(InternalType::Version, VERSION);
            }
            other => {
                debug!(msg_type = message.msg_type, ?other, "Ignoring internal command");
            }
        }
    }

    fn handle_mesh_message(&mut self, message: Message) -> bool {
        if !self.node.verify(&message) {
            self.reject(&message);
            return false;
        }

        if message.destination == self.node_id() {
            trace!(%message, "Delivering to controller");
            let ok = self.controller.send(&message);
            if ok {
                self.stats.delivered_to_controller += 1;
            } else {
                warn!(sender = message.sender, "Controller rejected message");
            }
            self.record_send(ok);
            self.dispatch(&message);
            return true;
        }

        if !self.arrived_for_relay(&message) {
            debug!(%message, "Not relaying");
            self.stats.not_relayed += 1;
            return false;
        }

        trace!(%message, "Relaying");
        let ok = self.node.mesh_mut().forward(message);
        if ok {
            self.stats.relayed += 1;
        }
        self.record_send(ok);
        false
    }

    /// A unicast message handed to this node by a neighbour that is neither
    /// its origin loop nor its destination. Broadcasts are never repeated.
    fn arrived_for_relay(&self, message: &Message) -> bool {
        let local = self.node_id();
        !message.is_broadcast()
            && message.sender != local
            && message.last != local
            && message.last != message.destination
    }

    fn dispatch(&mut self, message: &Message) {
        if let Some(callback) = self.callback.as_mut() {
            callback(message);
            self.stats.delivered_locally += 1;
        }
    }

    fn reject(&mut self, message: &Message) {
        warn!(
            sender = message.sender,
            destination = message.destination,
            "Dropping message that failed verification"
        );
        self.stats.signature_failures += 1;
        self.indicate(Activity::Err);
    }

    #[cfg(feature = "inclusion")]
    fn notify_inclusion(&mut self, enabled: bool) {
        self.send_internal(InternalType::InclusionMode, if enabled { "1" } else { "0" });
    }

    fn send_internal(&mut self, ty: InternalType, text: &str) {
        let local = self.node_id();
        let message = match Message::internal(local, ty).from_node(local).with_text(text) {
            Ok(message) => message,
            Err(e) => {
                error!(?ty, error = %e, "Failed to build internal message");
                return;
            }
        };

        let ok = self.controller.send(&message);
        if ok {
            self.stats.delivered_to_controller += 1;
        } else {
            warn!(?ty, "Controller rejected internal message");
        }
        self.record_send(ok);
    }

    fn record_send(&mut self, accepted: bool) {
        if accepted {
            self.indicate(Activity::Tx);
        } else {
            self.stats.send_failures += 1;
            self.indicate(Activity::Err);
        }
    }

    fn indicate(&mut self, activity: Activity) {
        #[cfg(feature = "status-leds")]
        if let Some(leds) = self.leds.as_mut() {
            let led = match activity {
                Activity::Rx => Led::Rx,
                Activity::Tx => Led::Tx,
                Activity::Err => Led::Err,
            };
            leds.blink(led, self.hardware.millis());
        }
        #[cfg(not(feature = "status-leds"))]
        let _ = activity;
    }
}

impl<M, C, H> Route for Gateway<M, C, H>
where
    M: MeshTransport,
    C: ControllerLink,
    H: Hardware,
{
    fn send_route(&mut self, message: Message) -> bool {
        Gateway::send_route(self, message)
    }
}
