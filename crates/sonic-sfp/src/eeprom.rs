//! Transceiver EEPROM access.
//!
//! The optics driver exposes each module's lower memory page as a binary
//! `eeprom` node. Accesses go byte-wise through [`EepromAccess`], which
//! retries failed I/O a bounded number of times and waits a settle delay
//! after every access before the bus is used again.
//!
//! Offsets follow SFF-8436/SFF-8636 (QSFP) lower page layout.

use crate::clock::Clock;
use crate::error::{SfpError, SfpResult};
use crate::register::RegisterFile;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// QSFP lower page offsets.
pub mod sff8636 {
    /// Lower page plus upper page 00h.
    pub const EEPROM_SIZE: u64 = 256;
    /// Module temperature, signed 16-bit, 1/256 degC.
    pub const TEMPERATURE_OFFSET: u64 = 22;
    /// Supply voltage, unsigned 16-bit, 100 uV units.
    pub const VOLTAGE_OFFSET: u64 = 26;
    /// TX disable, bits 0..3 for channels 1..4.
    pub const TX_DISABLE_OFFSET: u64 = 86;
    /// Power control byte.
    pub const POWER_CONTROL_OFFSET: u64 = 93;
    /// Power control: software override of the LPMode pin.
    pub const POWER_OVERRIDE_BIT: u8 = 0x1;
    /// Power control: request low power while overriding.
    pub const POWER_SET_BIT: u8 = 0x2;
    /// TX disable bits in use.
    pub const TX_DISABLE_MASK: u8 = 0x0f;
}

/// Default retries after a failed access.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default delay after each access.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(10);

/// Decoded power control byte (offset 93).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PowerControl(pub u8);

impl PowerControl {
    /// Override on, power-set on: forced low power.
    pub const LOW_POWER: PowerControl = PowerControl(0x3);
    /// Override on, power-set off: forced high power.
    pub const HIGH_POWER: PowerControl = PowerControl(0x1);

    pub fn new(power_override: bool, power_set: bool) -> Self {
        let mut value = 0;
        if power_override {
            value |= sff8636::POWER_OVERRIDE_BIT;
        }
        if power_set {
            value |= sff8636::POWER_SET_BIT;
        }
        Self(value)
    }

    /// Request for low or high power through software override.
    pub fn for_low_power(low_power: bool) -> Self {
        if low_power {
            Self::LOW_POWER
        } else {
            Self::HIGH_POWER
        }
    }

    pub fn power_override(self) -> bool {
        self.0 & sff8636::POWER_OVERRIDE_BIT != 0
    }

    pub fn power_set(self) -> bool {
        self.0 & sff8636::POWER_SET_BIT != 0
    }

    /// Low-power state forced by software, or `None` when the LPMode pin
    /// is in control.
    pub fn low_power(self) -> Option<bool> {
        self.power_override().then(|| self.power_set())
    }
}

/// Module temperature and supply voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DomReading {
    /// Degrees Celsius.
    pub temperature_c: f64,
    /// Volts.
    pub voltage_v: f64,
}

impl DomReading {
    /// Decodes the raw big-endian temperature and voltage words.
    pub fn decode(temperature: [u8; 2], voltage: [u8; 2]) -> Self {
        Self {
            temperature_c: f64::from(i16::from_be_bytes(temperature)) / 256.0,
            voltage_v: f64::from(u16::from_be_bytes(voltage)) / 10_000.0,
        }
    }
}

/// Byte-level EEPROM access with bounded retries.
#[derive(Debug, Clone)]
pub struct EepromAccess<R, C> {
    regs: R,
    clock: C,
    retries: u32,
    settle: Duration,
}

impl<R: RegisterFile, C: Clock> EepromAccess<R, C> {
    pub fn new(regs: R, clock: C, retries: u32, settle: Duration) -> Self {
        Self {
            regs,
            clock,
            retries,
            settle,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Reads `len` bytes at `offset`.
    pub fn read(&self, path: &Path, offset: u64, len: usize) -> SfpResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.with_retry(path, "read", || self.regs.read_at(path, offset, &mut buf))?;
        Ok(buf)
    }

    pub fn read_byte(&self, path: &Path, offset: u64) -> SfpResult<u8> {
        let mut buf = [0u8; 1];
        self.with_retry(path, "read", || self.regs.read_at(path, offset, &mut buf))?;
        Ok(buf[0])
    }

    /// Writes `data` at `offset`.
    pub fn write(&self, path: &Path, offset: u64, data: &[u8]) -> SfpResult<()> {
        self.with_retry(path, "write", || self.regs.write_at(path, offset, data))
    }

    pub fn write_byte(&self, path: &Path, offset: u64, value: u8) -> SfpResult<()> {
        self.write(path, offset, &[value])
    }

    /// Read-modify-write of one byte; returns the value written.
    ///
    /// Not atomic: a concurrent writer to the same byte can be lost.
    pub fn update_byte(
        &self,
        path: &Path,
        offset: u64,
        f: impl FnOnce(u8) -> u8,
    ) -> SfpResult<u8> {
        let current = self.read_byte(path, offset)?;
        let updated = f(current);
        if updated != current {
            self.write_byte(path, offset, updated)?;
        }
        Ok(updated)
    }

    fn with_retry<T>(
        &self,
        path: &Path,
        op: &'static str,
        mut f: impl FnMut() -> io::Result<T>,
    ) -> SfpResult<T> {
        let mut attempt = 0;
        loop {
            let result = f();
            self.clock.sleep(self.settle);
            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    debug!(path = %path.display(), op, attempt, error = %e, "eeprom access failed, retrying");
                }
                Err(e) => {
                    warn!(path = %path.display(), op, attempts = attempt + 1, error = %e, "eeprom access failed");
                    return Err(SfpError::io(path, e));
                }
            }
        }
    }
}
