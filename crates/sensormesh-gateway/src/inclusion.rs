//! Inclusion mode
//!
//! While the inclusion window is open the controller accepts new nodes
//! presenting themselves. The window opens on an explicit request, at
//! startup when a duration is configured, or on a button press. It closes on
//! an explicit request, when the duration has elapsed, or on the next button
//! press.
//!
//! Time is polled: [`InclusionController::poll`] is called once per gateway
//! step and reports at most one transition.

use std::time::Duration;
use tracing::{debug, info};

use crate::hardware::{duration_millis, Hardware};
#[cfg(feature = "inclusion-button")]
use crate::hardware::{Pin, PinMode};

/// State of the inclusion window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InclusionWindow {
    active: bool,
    started_at: u64,
    duration_ms: u64,
}

impl InclusionWindow {
    /// Create a closed window; a zero duration never times out
    pub fn new(duration: Duration) -> Self {
        Self {
            active: false,
            started_at: 0,
            duration_ms: duration_millis(duration),
        }
    }

    /// Whether the window is open
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// When the window was opened, if it is open
    pub fn started_at(&self) -> Option<u64> {
        self.active.then_some(self.started_at)
    }

    /// Configured window length
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Open the window at `now`; returns whether the state changed
    pub fn activate(&mut self, now: u64) -> bool {
        if self.active {
            return false;
        }
        self.active = true;
        self.started_at = now;
        true
    }

    /// Close the window; returns whether the state changed
    pub fn deactivate(&mut self) -> bool {
        std::mem::replace(&mut self.active, false)
    }

    /// Whether an open window has run its full duration at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        self.active && self.duration_ms > 0 && now.saturating_sub(self.started_at) >= self.duration_ms
    }

    /// Time left before the window closes on its own
    pub fn remaining(&self, now: u64) -> Option<Duration> {
        if !self.active || self.duration_ms == 0 {
            return None;
        }
        let elapsed = now.saturating_sub(self.started_at);
        Some(Duration::from_millis(self.duration_ms.saturating_sub(elapsed)))
    }
}

/// Debounced, active-low push button
#[cfg(feature = "inclusion-button")]
#[derive(Debug, Clone)]
pub struct InclusionButton {
    pin: Pin,
    debounce_ms: u64,
    raw_level: bool,
    raw_since: u64,
    stable_level: bool,
}

#[cfg(feature = "inclusion-button")]
impl InclusionButton {
    /// Create a button on `pin` with the given debounce interval
    pub fn new(pin: Pin, debounce: Duration) -> Self {
        Self {
            pin,
            debounce_ms: duration_millis(debounce),
            raw_level: true,
            raw_since: 0,
            stable_level: true,
        }
    }

    /// Button pin
    pub fn pin(&self) -> Pin {
        self.pin
    }

    /// Configure the pin and take the current level as the resting state
    pub fn configure(&mut self, hw: &mut impl Hardware) {
        hw.pin_mode(self.pin, PinMode::InputPullup);
        let level = hw.digital_read(self.pin);
        self.raw_level = level;
        self.stable_level = level;
        self.raw_since = hw.millis();
    }

    /// Feed one sample; returns true on a debounced press
    pub fn sample(&mut self, level: bool, now: u64) -> bool {
        if level != self.raw_level {
            self.raw_level = level;
            self.raw_since = now;
        }

        if self.raw_level != self.stable_level
            && now.saturating_sub(self.raw_since) >= self.debounce_ms
        {
            self.stable_level = self.raw_level;
            // Pressed pulls the pin low
            return !self.stable_level;
        }
        false
    }
}

/// Inclusion-mode state machine
#[derive(Debug, Clone, Default)]
pub struct InclusionController {
    window: InclusionWindow,
    #[cfg(feature = "inclusion-button")]
    button: Option<InclusionButton>,
}

impl InclusionController {
    /// Create a closed controller with the given window length
    pub fn new(duration: Duration) -> Self {
        Self {
            window: InclusionWindow::new(duration),
            #[cfg(feature = "inclusion-button")]
            button: None,
        }
    }

    /// Attach a trigger button
    #[cfg(feature = "inclusion-button")]
    pub fn with_button(mut self, button: InclusionButton) -> Self {
        self.button = Some(button);
        self
    }

    /// Configure inputs and open the window when a duration is set
    ///
    /// Returns the new state if the window opened.
    pub fn begin(&mut self, hw: &mut impl Hardware) -> Option<bool> {
        #[cfg(feature = "inclusion-button")]
        if let Some(button) = self.button.as_mut() {
            button.configure(hw);
            debug!(pin = button.pin(), "Inclusion button configured");
        }

        if self.window.duration_ms > 0 {
            return self.set(true, hw.millis());
        }
        None
    }

    /// Open or close the window explicitly
    ///
    /// Returns the new state if it changed.
    pub fn set(&mut self, enabled: bool, now: u64) -> Option<bool> {
        let changed = if enabled {
            self.window.activate(now)
        } else {
            self.window.deactivate()
        };

        if changed {
            info!(enabled, at = now, "Inclusion mode changed");
            Some(enabled)
        } else {
            None
        }
    }

    /// Check the button and the timeout
    ///
    /// A button press in this call pre-empts the timeout check, so at most
    /// one transition is reported. Returns the new state if it changed.
    pub fn poll(&mut self, hw: &impl Hardware) -> Option<bool> {
        let now = hw.millis();

        #[cfg(feature = "inclusion-button")]
        if let Some(button) = self.button.as_mut() {
            let level = hw.digital_read(button.pin());
            if button.sample(level, now) {
                debug!(pin = button.pin(), "Inclusion button pressed");
                let enable = !self.window.is_active();
                return self.set(enable, now);
            }
        }

        if self.window.is_expired(now) {
            debug!(
                started_at = self.window.started_at,
                duration_ms = self.window.duration_ms,
                "Inclusion window elapsed"
            );
            return self.set(false, now);
        }
        None
    }

    /// Whether the window is open
    pub fn is_active(&self) -> bool {
        self.window.is_active()
    }

    /// The underlying window
    pub fn window(&self) -> &InclusionWindow {
        &self.window
    }
}
