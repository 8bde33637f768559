//! Hardware abstraction consumed by the gateway
//!
//! The gateway only needs a monotonic millisecond clock and digital I/O for
//! the inclusion button and status LEDs. Persistent storage is part of the
//! contract for the transports and routing layers that keep state across
//! restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::Result;

/// Size of the persistent storage area in bytes
pub const STORAGE_SIZE: usize = 1024;

/// Value of an erased storage cell
pub const STORAGE_ERASED: u8 = 0xFF;

/// Pin identifier
pub type Pin = u8;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Digital pin configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Floating input
    Input,
    /// Input with pull-up, idle level high
    InputPullup,
    /// Push-pull output
    Output,
}

/// Platform capabilities used by the gateway and its collaborators
pub trait Hardware {
    /// Milliseconds since an arbitrary fixed point, never decreasing
    fn millis(&self) -> u64;

    /// Configure a digital pin
    fn pin_mode(&mut self, pin: Pin, mode: PinMode);

    /// Read a digital input; `true` is a high level
    fn digital_read(&self, pin: Pin) -> bool;

    /// Drive a digital output; `true` is a high level
    fn digital_write(&mut self, pin: Pin, high: bool);

    /// Read one byte of persistent storage
    fn storage_read(&self, pos: usize) -> u8;

    /// Write one byte of persistent storage
    fn storage_write(&mut self, pos: usize, value: u8);
}

impl<H: Hardware + ?Sized> Hardware for Box<H> {
    fn millis(&self) -> u64 {
        (**self).millis()
    }

    fn pin_mode(&mut self, pin: Pin, mode: PinMode) {
        (**self).pin_mode(pin, mode)
    }

    fn digital_read(&self, pin: Pin) -> bool {
        (**self).digital_read(pin)
    }

    fn digital_write(&mut self, pin: Pin, high: bool) {
        (**self).digital_write(pin, high)
    }

    fn storage_read(&self, pos: usize) -> u8 {
        (**self).storage_read(pos)
    }

    fn storage_write(&mut self, pos: usize, value: u8) {
        (**self).storage_write(pos, value)
    }
}

/// Host implementation of [`Hardware`]
///
/// The clock starts at construction. Pins are simulated in memory: inputs
/// idle high unless driven with [`SystemHardware::set_input`]. Storage lives
/// in memory and, when a path is given, is written through to that file.
#[derive(Debug)]
pub struct SystemHardware {
    started: Instant,
    modes: HashMap<Pin, PinMode>,
    levels: HashMap<Pin, bool>,
    storage: Vec<u8>,
    storage_path: Option<PathBuf>,
}

impl SystemHardware {
    /// Create hardware with volatile storage
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            modes: HashMap::new(),
            levels: HashMap::new(),
            storage: vec![STORAGE_ERASED; STORAGE_SIZE],
            storage_path: None,
        }
    }

    /// Create hardware whose storage is backed by a file
    ///
    /// An existing file is loaded; a missing one starts erased.
    pub fn with_storage_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut hw = Self::new();

        match std::fs::read(&path) {
            Ok(bytes) => {
                let n = bytes.len().min(STORAGE_SIZE);
                hw.storage[..n].copy_from_slice(&bytes[..n]);
                debug!(path = %path.display(), bytes = n, "Loaded persistent storage");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No storage file yet, starting erased");
            }
            Err(e) => return Err(e.into()),
        }

        hw.storage_path = Some(path);
        Ok(hw)
    }

    /// Drive a simulated input pin
    pub fn set_input(&mut self, pin: Pin, high: bool) {
        self.levels.insert(pin, high);
    }

    /// Configured mode of a pin
    pub fn mode(&self, pin: Pin) -> Option<PinMode> {
        self.modes.get(&pin).copied()
    }

    fn flush_storage(&self) {
        if let Some(path) = &self.storage_path {
            if let Err(e) = std::fs::write(path, &self.storage) {
                warn!(path = %path.display(), "Failed to persist storage: {}", e);
            }
        }
    }
}

impl Default for SystemHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl Hardware for SystemHardware {
    fn millis(&self) -> u64 {
        duration_millis(self.started.elapsed())
    }

    fn pin_mode(&mut self, pin: Pin, mode: PinMode) {
        self.modes.insert(pin, mode);
        if mode == PinMode::InputPullup {
            self.levels.entry(pin).or_insert(true);
        }
    }

    fn digital_read(&self, pin: Pin) -> bool {
        self.levels.get(&pin).copied().unwrap_or(true)
    }

    fn digital_write(&mut self, pin: Pin, high: bool) {
        self.levels.insert(pin, high);
    }

    fn storage_read(&self, pos: usize) -> u8 {
        self.storage.get(pos).copied().unwrap_or(STORAGE_ERASED)
    }

    fn storage_write(&mut self, pos: usize, value: u8) {
        match self.storage.get_mut(pos) {
            Some(cell) if *cell != value => {
                *cell = value;
                self.flush_storage();
            }
            Some(_) => {}
            None => warn!(pos, "Storage write out of range"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let hw = SystemHardware::new();
        let a = hw.millis();
        let b = hw.millis();
        assert!(b >= a);
    }

    #[test]
    fn test_pullup_input_idles_high() {
        let mut hw = SystemHardware::new();
        hw.pin_mode(3, PinMode::InputPullup);
        assert!(hw.digital_read(3));
        assert_eq!(hw.mode(3), Some(PinMode::InputPullup));

        hw.set_input(3, false);
        assert!(!hw.digital_read(3));
    }

    #[test]
    fn test_storage_starts_erased() {
        let mut hw = SystemHardware::new();
        assert_eq!(hw.storage_read(0), STORAGE_ERASED);

        hw.storage_write(10, 0x42);
        assert_eq!(hw.storage_read(10), 0x42);
        assert_eq!(hw.storage_read(STORAGE_SIZE + 5), STORAGE_ERASED);
    }

    #[test]
    fn test_storage_file_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "sensormesh-storage-{}.bin",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let mut hw = SystemHardware::with_storage_file(&path).unwrap();
            hw.storage_write(1, 7);
        }

        let hw = SystemHardware::with_storage_file(&path).unwrap();
        assert_eq!(hw.storage_read(1), 7);
        assert_eq!(hw.storage_read(2), STORAGE_ERASED);

        let _ = std::fs::remove_file(&path);
    }
}
