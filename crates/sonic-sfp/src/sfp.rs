//! Vendor-neutral transceiver utility.
//!
//! [`SfpUtil`] binds a [`PlatformConfig`] to a register file and a clock and
//! offers the operations xcvrd and the `sfputil` CLI need. Methods returning
//! [`SfpResult`] surface every failure; the `is_*`/`try_*` adapters and
//! [`SfpUtil::get_transceiver_change_event`] log failures and answer
//! `false`, the way platform plugins report errors.

use crate::bitmap::{NodeBitmapReader, PresenceBitmap, PresenceSource};
use crate::clock::{Clock, SystemClock};
use crate::config::{BitmapSource, LpModeConfig, PlatformConfig};
use crate::control::{ControlLine, LineMap, PerPortPresenceReader};
use crate::detector::{ChangeDetector, PortEvents};
use crate::eeprom::{sff8636, DomReading, EepromAccess, PowerControl};
use crate::error::{SfpError, SfpResult};
use crate::poller::{PollStats, PollStrategy, PresencePoller, MIN_DEBOUNCE};
use crate::port::PortLayout;
use crate::register::{RegisterFile, SysfsRegisterFile};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Presence bitmap source selected by the platform.
#[derive(Debug, Clone)]
pub enum PresenceSampler<R> {
    Nodes(NodeBitmapReader<R>),
    PerPort(PerPortPresenceReader<R>),
}

impl<R: RegisterFile> PresenceSource for PresenceSampler<R> {
    fn read_presence_bitmap(&self) -> SfpResult<PresenceBitmap> {
        match self {
            PresenceSampler::Nodes(reader) => reader.read_presence_bitmap(),
            PresenceSampler::PerPort(reader) => reader.read_presence_bitmap(),
        }
    }
}

/// [`SfpUtil`] on real sysfs with the monotonic clock.
pub type SysfsSfpUtil = SfpUtil<SysfsRegisterFile, SystemClock>;

/// Transceiver operations for one platform.
#[derive(Debug)]
pub struct SfpUtil<R, C> {
    config: PlatformConfig,
    regs: R,
    clock: C,
    eeprom: EepromAccess<R, C>,
    poller: Option<PresencePoller<PresenceSampler<R>, C>>,
}

impl SysfsSfpUtil {
    /// Opens the platform on sysfs, optionally relocated under `root`.
    pub fn sysfs(config: PlatformConfig, root: Option<PathBuf>) -> SfpResult<Self> {
        let regs = match root {
            Some(root) => SysfsRegisterFile::with_root(root),
            None => SysfsRegisterFile::new(),
        };
        Self::new(config, regs, SystemClock::new())
    }
}

impl<R, C> SfpUtil<R, C>
where
    R: RegisterFile + Clone,
    C: Clock + Clone,
{
    /// Validates `config` and wires up EEPROM access and change detection.
    pub fn new(config: PlatformConfig, regs: R, clock: C) -> SfpResult<Self> {
        config.validate()?;

        let eeprom = EepromAccess::new(
            regs.clone(),
            clock.clone(),
            config.eeprom.retries,
            config.eeprom.settle(),
        );

        let poller = config.presence.change_event.as_ref().map(|event| {
            let sampler = match event.source {
                BitmapSource::Nodes => PresenceSampler::Nodes(NodeBitmapReader::new(
                    regs.clone(),
                    event.nodes.clone(),
                    event.layout.clone(),
                    &config.ports,
                )),
                BitmapSource::PerPort => PresenceSampler::PerPort(PerPortPresenceReader::new(
                    regs.clone(),
                    config.ports.clone(),
                    config.presence.lines.clone(),
                )),
            };
            let reported = match event.source {
                BitmapSource::Nodes => event.layout.coverage(&config.ports),
                BitmapSource::PerPort => config.ports.port_mask(),
            };
            let detector = ChangeDetector::new(config.ports.clone(), event.polarity)
                .with_reported(reported);
            PresencePoller::new(sampler, clock.clone(), detector, event.strategy)
        });

        info!(
            platform = %config.name,
            ports = config.ports.len(),
            change_event = poller.is_some(),
            "transceiver platform initialized"
        );

        Ok(Self {
            config,
            regs,
            clock,
            eeprom,
            poller,
        })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn ports(&self) -> &PortLayout {
        &self.config.ports
    }

    pub fn port_start(&self) -> u32 {
        self.config.ports.port_start
    }

    pub fn port_end(&self) -> u32 {
        self.config.ports.port_end
    }

    /// Poller counters, if the platform supports change events.
    pub fn poll_stats(&self) -> Option<PollStats> {
        self.poller.as_ref().map(PresencePoller::stats)
    }

    /// Reads the presence line of `port`.
    pub fn get_presence(&self, port: u32) -> SfpResult<bool> {
        self.ports().check(port)?;
        let line = self.line(&self.config.presence.lines, port, "presence")?;
        line.read_asserted(&self.regs)
    }

    /// Low-power state of a QSFP module.
    pub fn get_low_power_mode(&self, port: u32) -> SfpResult<bool> {
        self.ports().check_qsfp(port, "lpmode")?;
        match &self.config.lpmode {
            LpModeConfig::Unsupported => Err(SfpError::Unsupported { operation: "lpmode" }),
            LpModeConfig::Eeprom { fallback } => {
                let control = self.read_power_control(port)?;
                if let Some(low_power) = control.low_power() {
                    return Ok(low_power);
                }
                // Override off: the LPMode pin decides.
                match fallback.resolve(self.ports(), port) {
                    Some(line) => line.read_asserted(&self.regs),
                    None => Ok(false),
                }
            }
            LpModeConfig::Line { lines } => {
                self.line(lines, port, "lpmode")?.read_asserted(&self.regs)
            }
        }
    }

    /// Requests low (`true`) or high power for a QSFP module.
    pub fn set_low_power_mode(&self, port: u32, low_power: bool) -> SfpResult<()> {
        self.ports().check_qsfp(port, "lpmode")?;
        match &self.config.lpmode {
            LpModeConfig::Unsupported => Err(SfpError::Unsupported { operation: "lpmode" }),
            LpModeConfig::Eeprom { .. } => {
                self.write_power_control(port, PowerControl::for_low_power(low_power))
            }
            LpModeConfig::Line { lines } => {
                let line = self.line(lines, port, "lpmode")?;
                line.write_asserted(&self.regs, low_power)?;
                info!(port, low_power, "set lpmode line");
                Ok(())
            }
        }
    }

    /// Pulses the reset line of a QSFP module.
    ///
    /// Blocks for the configured hold time when the line needs an explicit
    /// release.
    pub fn reset(&self, port: u32) -> SfpResult<()> {
        self.ports().check_qsfp(port, "reset")?;
        let reset = self
            .config
            .reset
            .as_ref()
            .ok_or(SfpError::Unsupported { operation: "reset" })?;
        let line = self.line(&reset.lines, port, "reset")?;

        line.write_raw(&self.regs, &reset.assert_value)?;
        if let Some(release) = &reset.release_value {
            self.clock.sleep(reset.hold());
            line.write_raw(&self.regs, release)?;
        }
        info!(port, path = %line.path.display(), "transceiver reset");
        Ok(())
    }

    /// True if software override of the LPMode pin is enabled.
    pub fn get_power_override(&self, port: u32) -> SfpResult<bool> {
        self.ports().check_qsfp(port, "power_override")?;
        Ok(self.read_power_control(port)?.power_override())
    }

    /// Writes the override and power-set bits.
    pub fn set_power_override(
        &self,
        port: u32,
        power_override: bool,
        power_set: bool,
    ) -> SfpResult<()> {
        self.ports().check_qsfp(port, "power_override")?;
        self.write_power_control(port, PowerControl::new(power_override, power_set))
    }

    /// TX disable bits, bit `n` for channel `n + 1`.
    pub fn get_tx_disable_channels(&self, port: u32) -> SfpResult<u8> {
        self.ports().check_qsfp(port, "tx_disable")?;
        let path = self.present_eeprom(port)?;
        let value = self.eeprom.read_byte(&path, sff8636::TX_DISABLE_OFFSET)?;
        Ok(value & sff8636::TX_DISABLE_MASK)
    }

    /// Disables or enables the channels in `mask`, leaving the others alone.
    pub fn set_tx_disable_channel(&self, port: u32, mask: u8, disable: bool) -> SfpResult<()> {
        self.ports().check_qsfp(port, "tx_disable")?;
        let path = self.present_eeprom(port)?;
        let mask = mask & sff8636::TX_DISABLE_MASK;
        let written = self.eeprom.update_byte(&path, sff8636::TX_DISABLE_OFFSET, |v| {
            if disable {
                v | mask
            } else {
                v & !mask
            }
        })?;
        info!(port, mask, disable, value = written, "set tx disable");
        Ok(())
    }

    /// Module temperature and supply voltage.
    pub fn get_dom(&self, port: u32) -> SfpResult<DomReading> {
        self.ports().check_qsfp(port, "dom")?;
        let path = self.present_eeprom(port)?;
        let len = (sff8636::VOLTAGE_OFFSET - sff8636::TEMPERATURE_OFFSET + 2) as usize;
        let raw = self.eeprom.read(&path, sff8636::TEMPERATURE_OFFSET, len)?;
        let volt = (sff8636::VOLTAGE_OFFSET - sff8636::TEMPERATURE_OFFSET) as usize;
        Ok(DomReading::decode(
            [raw[0], raw[1]],
            [raw[volt], raw[volt + 1]],
        ))
    }

    /// Raw EEPROM bytes.
    pub fn read_eeprom(&self, port: u32, offset: u64, len: usize) -> SfpResult<Vec<u8>> {
        self.ports().check(port)?;
        let in_range = u64::try_from(len)
            .ok()
            .and_then(|len| offset.checked_add(len))
            .is_some_and(|end| end <= sff8636::EEPROM_SIZE);
        if !in_range {
            return Err(SfpError::EepromRange {
                offset,
                len,
                size: sff8636::EEPROM_SIZE,
            });
        }
        let path = self.present_eeprom(port)?;
        self.eeprom.read(&path, offset, len)
    }

    /// EEPROM node of `port`.
    pub fn eeprom_path(&self, port: u32) -> SfpResult<PathBuf> {
        self.ports().check(port)?;
        self.config
            .eeprom
            .path_for(self.ports(), port)
            .ok_or(SfpError::Unsupported { operation: "eeprom" })
    }

    /// Waits for presence changes; see [`PresencePoller::poll_for_change`].
    pub fn poll_for_change(&mut self, timeout_ms: i64) -> SfpResult<PortEvents> {
        self.poller
            .as_mut()
            .ok_or(SfpError::Unsupported {
                operation: "change_event",
            })?
            .poll_for_change(timeout_ms)
    }

    /// Like [`SfpUtil::poll_for_change`], but for callers that loop on it.
    /// The debounced strategy returns at once when nothing changed, so an
    /// empty result is followed by a sleep of the debounce window.
    pub fn poll_for_change_paced(&mut self, timeout_ms: i64) -> SfpResult<PortEvents> {
        let events = self.poll_for_change(timeout_ms)?;
        let debounced = self
            .poller
            .as_ref()
            .is_some_and(|poller| poller.strategy() == PollStrategy::Debounced);
        if events.is_empty() && debounced {
            let window = u64::try_from(timeout_ms).map_or(Duration::ZERO, Duration::from_millis);
            self.clock.sleep(window.max(MIN_DEBOUNCE));
        }
        Ok(events)
    }

    /// xcvrd entry point: `(true, events)` on success, `(false, {})` on
    /// any failure. A clean timeout is `(true, {})`.
    pub fn get_transceiver_change_event(&mut self, timeout_ms: i64) -> (bool, PortEvents) {
        match self.poll_for_change(timeout_ms) {
            Ok(events) => (true, events),
            Err(e) => {
                warn!(timeout_ms, error = %e, "transceiver change event failed");
                (false, PortEvents::new())
            }
        }
    }

    pub fn is_present(&self, port: u32) -> bool {
        or_false("get_presence", port, self.get_presence(port))
    }

    pub fn is_low_power_mode(&self, port: u32) -> bool {
        or_false("get_low_power_mode", port, self.get_low_power_mode(port))
    }

    pub fn try_set_low_power_mode(&self, port: u32, low_power: bool) -> bool {
        let result = self.set_low_power_mode(port, low_power).map(|()| true);
        or_false("set_low_power_mode", port, result)
    }

    pub fn try_reset(&self, port: u32) -> bool {
        or_false("reset", port, self.reset(port).map(|()| true))
    }

    fn line(&self, lines: &LineMap, port: u32, operation: &'static str) -> SfpResult<ControlLine> {
        lines
            .resolve(self.ports(), port)
            .ok_or(SfpError::Unsupported { operation })
    }

    /// EEPROM path of a port whose module is present. Platforms without
    /// presence lines skip the check.
    fn present_eeprom(&self, port: u32) -> SfpResult<PathBuf> {
        if let Some(line) = self.config.presence.lines.resolve(self.ports(), port) {
            if !line.read_asserted(&self.regs)? {
                return Err(SfpError::NotPresent { port });
            }
        }
        self.eeprom_path(port)
    }

    fn read_power_control(&self, port: u32) -> SfpResult<PowerControl> {
        let path = self.present_eeprom(port)?;
        let value = self
            .eeprom
            .read_byte(&path, sff8636::POWER_CONTROL_OFFSET)?;
        debug!(port, value, "read power control");
        Ok(PowerControl(value))
    }

    fn write_power_control(&self, port: u32, control: PowerControl) -> SfpResult<()> {
        let path = self.present_eeprom(port)?;
        self.eeprom
            .write_byte(&path, sff8636::POWER_CONTROL_OFFSET, control.0)?;
        info!(port, value = control.0, "wrote power control");
        Ok(())
    }
}

fn or_false(operation: &'static str, port: u32, result: SfpResult<bool>) -> bool {
    result.unwrap_or_else(|e| {
        warn!(operation, port, error = %e, "transceiver operation failed");
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detector::PortState;
    use crate::register::MemoryRegisterFile;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    type TestUtil = SfpUtil<MemoryRegisterFile, ManualClock>;

    fn util(platform: &str) -> (MemoryRegisterFile, ManualClock, TestUtil) {
        let regs = MemoryRegisterFile::new();
        let clock = ManualClock::new();
        let config = PlatformConfig::builtin(platform).unwrap();
        let util = SfpUtil::new(config, regs.clone(), clock.clone()).unwrap();
        (regs, clock, util)
    }

    /// Seats a module: presence line asserted and a blank EEPROM.
    fn seat(regs: &MemoryRegisterFile, util: &TestUtil, port: u32) -> PathBuf {
        let line = util
            .config()
            .presence
            .lines
            .resolve(util.ports(), port)
            .unwrap();
        regs.set_text(&line.path, if line.active_low { "0" } else { "1" });
        let eeprom = util.eeprom_path(port).unwrap();
        regs.set_bytes(&eeprom, vec![0u8; 256]);
        eeprom
    }

    #[test]
    fn test_presence_and_port_bounds() {
        let (regs, _clock, util) = util("accton_as7716_32x");
        regs.set_text("/sys/bus/i2c/devices/11-0060/module_present_5", "1");
        regs.set_text("/sys/bus/i2c/devices/11-0060/module_present_6", "0");
        assert!(util.get_presence(5).unwrap());
        assert!(!util.get_presence(6).unwrap());
        assert!(matches!(
            util.get_presence(0),
            Err(SfpError::InvalidPort { port: 0, .. })
        ));
        assert!(matches!(
            util.get_presence(33),
            Err(SfpError::InvalidPort { port: 33, .. })
        ));
        // Missing node.
        assert!(!util.is_present(7));
        assert!(!util.is_present(33));
    }

    #[test]
    fn test_eeprom_lpmode_roundtrip() {
        let (regs, clock, util) = util("accton_as7716_32x");
        let eeprom = seat(&regs, &util, 1);
        assert_eq!(eeprom, PathBuf::from("/sys/bus/i2c/devices/29-0050/eeprom"));

        // Override clear, no fallback line: high power.
        assert!(!util.get_low_power_mode(1).unwrap());

        util.set_low_power_mode(1, true).unwrap();
        assert_eq!(regs.bytes(&eeprom).unwrap()[93], 0x3);
        assert!(util.get_low_power_mode(1).unwrap());

        util.set_low_power_mode(1, false).unwrap();
        assert_eq!(regs.bytes(&eeprom).unwrap()[93], 0x1);
        assert!(!util.is_low_power_mode(1));

        assert!(clock.sleeps().iter().all(|d| *d == Duration::from_millis(10)));
    }

    #[test]
    fn test_lpmode_requires_module() {
        let (regs, _clock, util) = util("accton_as7716_32x");
        regs.set_text("/sys/bus/i2c/devices/11-0060/module_present_3", "0");
        assert!(matches!(
            util.set_low_power_mode(3, true),
            Err(SfpError::NotPresent { port: 3 })
        ));
        assert!(!util.try_set_low_power_mode(3, true));
    }

    #[test]
    fn test_lpmode_not_applicable_to_sfp_ports() {
        let (_regs, _clock, util) = util("accton_as5835_54x");
        assert!(matches!(
            util.get_low_power_mode(10),
            Err(SfpError::NotApplicable { port: 10, .. })
        ));
        assert!(matches!(
            util.reset(48),
            Err(SfpError::NotApplicable { port: 48, .. })
        ));
    }

    #[test]
    fn test_lpmode_falls_back_to_cpld_line() {
        let (regs, _clock, util) = util("accton_as5835_54x");
        let eeprom = seat(&regs, &util, 50);
        assert_eq!(eeprom, PathBuf::from("/sys/bus/i2c/devices/28-0050/eeprom"));
        regs.set_text("/sys/bus/i2c/devices/3-0062/module_lpmode_49", "1");
        assert!(util.get_low_power_mode(50).unwrap());

        // Software override wins over the pin.
        util.set_low_power_mode(50, false).unwrap();
        assert!(!util.get_low_power_mode(50).unwrap());
        assert!(util.get_power_override(50).unwrap());
    }

    #[test]
    fn test_reset_with_release() {
        let (regs, clock, util) = util("accton_as5835_54x");
        let path = PathBuf::from("/sys/bus/i2c/devices/3-0062/module_reset_50");
        regs.set_text(&path, "1");
        util.reset(53).unwrap();
        assert_eq!(
            regs.line_writes(),
            vec![(path.clone(), "0".to_string()), (path, "1".to_string())]
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn test_reset_self_clearing() {
        let (regs, clock, util) = util("accton_as7716_32x");
        let path = PathBuf::from("/sys/bus/i2c/devices/11-0060/module_reset_32");
        regs.set_text(&path, "0");
        assert!(util.try_reset(32));
        assert_eq!(regs.line_writes(), vec![(path, "1".to_string())]);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_reset_gpio() {
        let (regs, clock, util) = util("quanta_ix8_rglbmc");
        let path = PathBuf::from("/sys/class/gpio/gpio36/value");
        regs.set_text(&path, "1");
        util.reset(50).unwrap();
        assert_eq!(
            regs.line_writes(),
            vec![(path.clone(), "0".to_string()), (path, "1".to_string())]
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn test_reset_failure_is_reported() {
        let (_regs, _clock, util) = util("accton_as7712_32x");
        assert!(matches!(util.reset(1), Err(SfpError::Io { .. })));
        assert!(!util.try_reset(1));
    }

    #[test]
    fn test_line_lpmode() {
        let (regs, _clock, util) = util("quanta_ix8_rglbmc");
        let path = PathBuf::from("/sys/class/gpio/gpio35/value");
        regs.set_text(&path, "0");
        assert!(!util.get_low_power_mode(49).unwrap());
        util.set_low_power_mode(49, true).unwrap();
        assert_eq!(regs.text(&path).unwrap(), "1");
        assert!(util.get_low_power_mode(49).unwrap());
    }

    #[test]
    fn test_tx_disable_read_modify_write() {
        let (regs, _clock, util) = util("accton_as7712_32x");
        let eeprom = seat(&regs, &util, 9);
        assert_eq!(eeprom, PathBuf::from("/sys/bus/i2c/devices/18-0050/eeprom"));

        util.set_tx_disable_channel(9, 0b0101, true).unwrap();
        assert_eq!(util.get_tx_disable_channels(9).unwrap(), 0b0101);
        util.set_tx_disable_channel(9, 0b0001, false).unwrap();
        assert_eq!(util.get_tx_disable_channels(9).unwrap(), 0b0100);
        assert_eq!(regs.bytes(&eeprom).unwrap()[86], 0b0100);
    }

    #[test]
    fn test_dom() {
        let (regs, _clock, util) = util("accton_as7712_32x");
        let eeprom = seat(&regs, &util, 1);
        let mut image = regs.bytes(&eeprom).unwrap();
        image[22..24].copy_from_slice(&[0x19, 0x80]);
        image[26..28].copy_from_slice(&[0x80, 0xe8]);
        regs.set_bytes(&eeprom, image);

        let dom = util.get_dom(1).unwrap();
        assert_eq!(dom.temperature_c, 25.5);
        assert_eq!(dom.voltage_v, 3.3);
    }

    #[test]
    fn test_read_eeprom() {
        let (regs, _clock, util) = util("accton_as7712_32x");
        let eeprom = seat(&regs, &util, 2);
        let mut image = regs.bytes(&eeprom).unwrap();
        image[0] = 0x11;
        regs.set_bytes(&eeprom, image);
        assert_eq!(util.read_eeprom(2, 0, 2).unwrap(), vec![0x11, 0x00]);
    }

    #[test]
    fn test_change_event_debounced() {
        let (regs, clock, mut util) = util("accton_as7716_32x");
        let node = "/sys/bus/i2c/devices/11-0060/module_present_all";
        regs.set_text(node, "01 00 00 00");

        let (ok, events) = util.get_transceiver_change_event(1000);
        assert!(ok);
        assert_eq!(events, PortEvents::from([(1, PortState::Inserted)]));

        regs.set_text(node, "00 00 00 00");
        let (ok, events) = util.get_transceiver_change_event(1000);
        assert!(ok);
        assert!(events.is_empty());

        clock.advance(Duration::from_secs(1));
        let (_, events) = util.get_transceiver_change_event(1000);
        assert_eq!(events, PortEvents::from([(1, PortState::Removed)]));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_change_event_rejects_negative_timeout() {
        let (_regs, _clock, mut util) = util("accton_as5835_54x");
        assert_eq!(
            util.get_transceiver_change_event(-1),
            (false, PortEvents::new())
        );
        assert_eq!(util.poll_stats().unwrap().samples, 0);
    }

    #[test]
    fn test_change_event_as5835_breakout() {
        let (regs, _clock, mut util) = util("accton_as5835_54x");
        regs.set_text(
            "/sys/bus/i2c/devices/3-0061/module_present_all",
            "01 00 00 00 00",
        );
        regs.set_text("/sys/bus/i2c/devices/3-0062/module_present_all", "00 04");
        let events = util.poll_for_change(1000).unwrap();
        assert_eq!(
            events,
            PortEvents::from([(1, PortState::Inserted), (49, PortState::Inserted)])
        );
    }

    #[test]
    fn test_change_event_as5835_cpld3_fields() {
        let (regs, _clock, mut util) = util("accton_as5835_54x");
        // Byte 4 bit 5 is port 38; bits 6 and 7 are unused.
        regs.set_text(
            "/sys/bus/i2c/devices/3-0061/module_present_all",
            "00 00 00 00 e0",
        );
        // Byte 5 bits 0-1 are ports 39-40, byte 6 bits 0-1 are ports 47-48
        // and byte 6 bit 7 is QSFP cage 54 (ports 69-72).
        regs.set_text("/sys/bus/i2c/devices/3-0062/module_present_all", "03 83");
        let events = util.poll_for_change(0).unwrap();
        assert_eq!(
            events,
            PortEvents::from([
                (38, PortState::Inserted),
                (39, PortState::Inserted),
                (40, PortState::Inserted),
                (47, PortState::Inserted),
                (48, PortState::Inserted),
                (69, PortState::Inserted),
            ])
        );
    }

    #[test]
    fn test_paced_polling_sleeps_after_quiet_debounced_sample() {
        let (regs, clock, mut util) = util("accton_as7716_32x");
        let node = "/sys/bus/i2c/devices/11-0060/module_present_all";
        regs.set_text(node, "01 00 00 00");

        let events = util.poll_for_change_paced(0).unwrap();
        assert_eq!(events, PortEvents::from([(1, PortState::Inserted)]));
        assert!(clock.sleeps().is_empty());

        assert!(util.poll_for_change_paced(0).unwrap().is_empty());
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);

        regs.set_text(node, "00 00 00 00");
        let events = util.poll_for_change_paced(0).unwrap();
        assert_eq!(events, PortEvents::from([(1, PortState::Removed)]));
        assert_eq!(clock.now(), Duration::from_secs(1));

        // Longer timeouts widen the window and the sleep with it.
        assert!(util.poll_for_change_paced(2500).unwrap().is_empty());
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_millis(2500)]
        );
        assert_eq!(util.poll_stats().unwrap().samples, 2);
    }

    #[test]
    fn test_paced_polling_adds_no_sleep_to_wait_strategy() {
        let (regs, clock, mut util) = util("accton_as5835_54x");
        regs.set_text(
            "/sys/bus/i2c/devices/3-0061/module_present_all",
            "00 00 00 00 00",
        );
        regs.set_text("/sys/bus/i2c/devices/3-0062/module_present_all", "00 00");
        assert!(util.poll_for_change_paced(2000).unwrap().is_empty());
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 2]);
    }

    #[test]
    fn test_read_eeprom_range_is_bounded() {
        let (regs, _clock, util) = util("accton_as7716_32x");
        seat(&regs, &util, 3);
        assert_eq!(util.read_eeprom(3, 128, 128).unwrap().len(), 128);
        assert!(matches!(
            util.read_eeprom(3, 0, 4096),
            Err(SfpError::EepromRange {
                offset: 0,
                len: 4096,
                size: 256
            })
        ));
        assert!(matches!(
            util.read_eeprom(3, 255, 2),
            Err(SfpError::EepromRange { .. })
        ));
        assert!(matches!(
            util.read_eeprom(3, u64::MAX, 1),
            Err(SfpError::EepromRange { .. })
        ));
    }

    #[test]
    fn test_change_event_per_port_lines() {
        let (regs, clock, mut util) = util("quanta_ix8_rglbmc");
        for port in 1..=48 {
            regs.set_text(format!("/sys/class/cpld-sfp28/port-{}/pre_n", port), "0");
        }
        for cage in 0..8 {
            regs.set_text(format!("/sys/class/gpio/gpio{}/value", 34 + cage * 4), "1");
        }
        let hook_regs = regs.clone();
        clock.on_sleep(move |now| {
            if now >= Duration::from_secs(2) {
                hook_regs.set_text("/sys/class/gpio/gpio62/value", "0");
            }
        });
        let events = util.poll_for_change(0).unwrap();
        assert_eq!(events, PortEvents::from([(56, PortState::Inserted)]));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_unsupported_operations() {
        let mut config = PlatformConfig::builtin("accton_as7716_32x").unwrap();
        config.presence.change_event = None;
        config.lpmode = LpModeConfig::Unsupported;
        config.reset = None;
        let mut util = SfpUtil::new(config, MemoryRegisterFile::new(), ManualClock::new()).unwrap();
        assert!(matches!(
            util.poll_for_change(0),
            Err(SfpError::Unsupported { .. })
        ));
        assert!(matches!(
            util.get_low_power_mode(1),
            Err(SfpError::Unsupported { .. })
        ));
        assert!(matches!(util.reset(1), Err(SfpError::Unsupported { .. })));
        assert!(util.poll_stats().is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = PlatformConfig::builtin("accton_as7712_32x").unwrap();
        config.ports.port_end = 200;
        assert!(SfpUtil::new(config, MemoryRegisterFile::new(), ManualClock::new()).is_err());
    }
}
