//! Configuration types for the gateway
//!
//! This module provides configuration structures for the radio mesh, the
//! controller link, the inclusion window, signing and the status LEDs.
//! Configuration files are JSON; durations are humantime strings
//! (`"60s"`, `"300ms"`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GatewayError, Result};
use crate::hardware::Pin;
use crate::message::{NodeId, BROADCAST_ADDRESS, GATEWAY_ADDRESS};

/// Default UDP port of the mesh transport
pub const DEFAULT_UDP_PORT: u16 = 5003;

/// Default baud rate for serial controller links
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default inclusion window
pub const DEFAULT_INCLUSION_DURATION: Duration = Duration::from_secs(60);

/// Default inclusion button pin
pub const DEFAULT_BUTTON_PIN: Pin = 3;

/// Default button debounce interval
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Default capacity of the learned routing table
pub const DEFAULT_ROUTING_TABLE_SIZE: usize = 255;

/// Default receive LED pin
pub const DEFAULT_RX_LED_PIN: Pin = 6;

/// Default transmit LED pin
pub const DEFAULT_TX_LED_PIN: Pin = 5;

/// Default error LED pin
pub const DEFAULT_ERR_LED_PIN: Pin = 4;

/// Default LED blink period
pub const DEFAULT_BLINK_PERIOD: Duration = Duration::from_millis(300);

/// Length of a signing pre-shared key in bytes
pub const PSK_LEN: usize = 32;

/// Main configuration for the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Radio mesh settings
    #[serde(default)]
    pub radio: RadioConfig,

    /// Controller link settings
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Inclusion window settings
    #[serde(default)]
    pub inclusion: InclusionConfig,

    /// Signing settings
    #[serde(default)]
    pub signing: SigningConfig,

    /// Status LED settings
    #[serde(default)]
    pub leds: LedConfig,
}

impl GatewayConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: GatewayConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.radio.node_id == BROADCAST_ADDRESS {
            return Err(GatewayError::InvalidConfig(format!(
                "node_id {} is the broadcast address",
                BROADCAST_ADDRESS
            )));
        }
        if self.radio.routing_table_size == 0 {
            return Err(GatewayError::InvalidConfig(
                "routing_table_size must be at least 1".to_string(),
            ));
        }
        if self.radio.peers.contains_key(&BROADCAST_ADDRESS) {
            return Err(GatewayError::InvalidConfig(
                "peers cannot contain the broadcast address".to_string(),
            ));
        }
        if self.signing.psk.is_some() {
            self.signing.key()?;
        }
        Ok(())
    }
}

/// Radio mesh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Address of this gateway in the mesh
    #[serde(default)]
    pub node_id: NodeId,

    /// Local UDP bind address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Static routes: node id to UDP address
    #[serde(default)]
    pub peers: BTreeMap<NodeId, SocketAddr>,

    /// Capacity of the learned routing table
    #[serde(default = "default_routing_table_size")]
    pub routing_table_size: usize,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_UDP_PORT))
}

fn default_routing_table_size() -> usize {
    DEFAULT_ROUTING_TABLE_SIZE
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            node_id: GATEWAY_ADDRESS,
            bind: default_bind(),
            peers: BTreeMap::new(),
            routing_table_size: DEFAULT_ROUTING_TABLE_SIZE,
        }
    }
}

/// Controller link selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControllerConfig {
    /// Lines on stdin/stdout
    #[default]
    Stdio,
    /// Serial port
    Serial {
        /// Path to serial port (e.g., /dev/ttyUSB0, COM3)
        port: PathBuf,
        /// Baud rate (default: 115200)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// TCP listener
    Tcp {
        /// Listen address
        bind: SocketAddr,
    },
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Inclusion window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InclusionConfig {
    /// Window length; zero disables the automatic timeout
    #[serde(with = "humantime_serde", default = "default_inclusion_duration")]
    pub duration: Duration,

    /// Button toggling the window (none = no button)
    #[serde(default)]
    pub button_pin: Option<Pin>,

    /// Time the button level must be stable before a press counts
    #[serde(with = "humantime_serde", default = "default_debounce")]
    pub debounce: Duration,
}

fn default_inclusion_duration() -> Duration {
    DEFAULT_INCLUSION_DURATION
}

fn default_debounce() -> Duration {
    DEFAULT_DEBOUNCE
}

impl Default for InclusionConfig {
    fn default() -> Self {
        Self {
            duration: DEFAULT_INCLUSION_DURATION,
            button_pin: None,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Signing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Pre-shared key as 64 hex characters (none = no signing)
    #[serde(default)]
    pub psk: Option<String>,

    /// Reject inbound messages without a signature
    #[serde(default)]
    pub require_signed: bool,
}

impl SigningConfig {
    /// Decode the pre-shared key, if one is configured
    pub fn key(&self) -> Result<Option<[u8; PSK_LEN]>> {
        let Some(psk) = &self.psk else {
            return Ok(None);
        };

        let bytes = hex::decode(psk.trim()).map_err(|e| GatewayError::InvalidKey(e.to_string()))?;
        let key: [u8; PSK_LEN] = bytes.as_slice().try_into().map_err(|_| {
            GatewayError::InvalidKey(format!("expected {} bytes, got {}", PSK_LEN, bytes.len()))
        })?;
        Ok(Some(key))
    }
}

/// Status LED configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedConfig {
    /// Drive the LEDs at all
    #[serde(default)]
    pub enabled: bool,

    /// Receive LED pin
    #[serde(default = "default_rx_pin")]
    pub rx_pin: Pin,

    /// Transmit LED pin
    #[serde(default = "default_tx_pin")]
    pub tx_pin: Pin,

    /// Error LED pin
    #[serde(default = "default_err_pin")]
    pub err_pin: Pin,

    /// How long one blink keeps an LED lit
    #[serde(with = "humantime_serde", default = "default_blink_period")]
    pub blink_period: Duration,
}

fn default_rx_pin() -> Pin {
    DEFAULT_RX_LED_PIN
}

fn default_tx_pin() -> Pin {
    DEFAULT_TX_LED_PIN
}

fn default_err_pin() -> Pin {
    DEFAULT_ERR_LED_PIN
}

fn default_blink_period() -> Duration {
    DEFAULT_BLINK_PERIOD
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rx_pin: DEFAULT_RX_LED_PIN,
            tx_pin: DEFAULT_TX_LED_PIN,
            err_pin: DEFAULT_ERR_LED_PIN,
            blink_period: DEFAULT_BLINK_PERIOD,
        }
    }
}

/// Builder for GatewayConfig
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gateway node id
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.config.radio.node_id = node_id;
        self
    }

    /// Set the mesh bind address
    pub fn bind(mut self, bind: SocketAddr) -> Self {
        self.config.radio.bind = bind;
        self
    }

    /// Add a static mesh route
    pub fn peer(mut self, node_id: NodeId, addr: SocketAddr) -> Self {
        self.config.radio.peers.insert(node_id, addr);
        self
    }

    /// Use a serial controller link
    pub fn serial_port(mut self, port: impl Into<PathBuf>, baud_rate: u32) -> Self {
        self.config.controller = ControllerConfig::Serial {
            port: port.into(),
            baud_rate,
        };
        self
    }

    /// Use a TCP controller link
    pub fn tcp(mut self, bind: SocketAddr) -> Self {
        self.config.controller = ControllerConfig::Tcp { bind };
        self
    }

    /// Set the inclusion window length
    pub fn inclusion_duration(mut self, duration: Duration) -> Self {
        self.config.inclusion.duration = duration;
        self
    }

    /// Set the inclusion button pin
    pub fn inclusion_button(mut self, pin: Pin) -> Self {
        self.config.inclusion.button_pin = Some(pin);
        self
    }

    /// Set the signing key (hex)
    pub fn psk(mut self, psk: impl Into<String>) -> Self {
        self.config.signing.psk = Some(psk.into());
        self
    }

    /// Require signatures on inbound messages
    pub fn require_signed(mut self, required: bool) -> Self {
        self.config.signing.require_signed = required;
        self
    }

    /// Enable or disable the status LEDs
    pub fn leds(mut self, enabled: bool) -> Self {
        self.config.leds.enabled = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
