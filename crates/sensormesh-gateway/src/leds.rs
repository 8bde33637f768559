//! Status indicator LEDs
//!
//! Three active-low LEDs signal receive, transmit and error activity. A
//! trigger lights the LED for one blink period; [`StatusLeds::update`] turns
//! it off again once the period has passed.

use std::time::Duration;

use crate::config::LedConfig;
use crate::hardware::{duration_millis, Hardware, Pin, PinMode};

/// Indicator selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    /// Message received
    Rx = 0,
    /// Message sent
    Tx = 1,
    /// Send rejected or message dropped
    Err = 2,
}

/// Blinking rx/tx/err indicators
#[derive(Debug, Clone)]
pub struct StatusLeds {
    pins: [Pin; 3],
    period_ms: u64,
    lit_until: [Option<u64>; 3],
    lit: [bool; 3],
}

impl StatusLeds {
    /// Create indicators on the given pins
    pub fn new(rx: Pin, tx: Pin, err: Pin, period: Duration) -> Self {
        Self {
            pins: [rx, tx, err],
            period_ms: duration_millis(period),
            lit_until: [None; 3],
            lit: [false; 3],
        }
    }

    /// Create from LED configuration
    pub fn from_config(config: &LedConfig) -> Self {
        Self::new(
            config.rx_pin,
            config.tx_pin,
            config.err_pin,
            config.blink_period,
        )
    }

    /// Configure the pins and switch everything off
    pub fn begin(&mut self, hw: &mut impl Hardware) {
        for (i, &pin) in self.pins.iter().enumerate() {
            hw.pin_mode(pin, PinMode::Output);
            hw.digital_write(pin, true);
            self.lit[i] = false;
        }
    }

    /// Start a blink
    pub fn blink(&mut self, led: Led, now: u64) {
        self.lit_until[led as usize] = Some(now.saturating_add(self.period_ms));
    }

    /// Drive the pins for the current time
    pub fn update(&mut self, hw: &mut impl Hardware) {
        let now = hw.millis();
        for i in 0..self.pins.len() {
            let on = match self.lit_until[i] {
                Some(until) if now < until => true,
                Some(_) => {
                    self.lit_until[i] = None;
                    false
                }
                None => false,
            };
            if on != self.lit[i] {
                self.lit[i] = on;
                hw.digital_write(self.pins[i], !on);
            }
        }
    }

    /// Whether an LED is currently lit
    pub fn is_lit(&self, led: Led) -> bool {
        self.lit[led as usize]
    }
}
