//! Per-port control lines (presence, LPMode, reset).
//!
//! CPLD and GPIO drivers expose one text node per cage and signal. Which node
//! a port uses is described by [`LineGroup`]s: a cage range, a path template
//! and an optional GPIO numbering rule.
//!
//! Path templates accept `{port}`, `{cage}` and `{line}`, where
//! `line = line_base + (cage - first_cage) * line_stride`.

use crate::bitmap::{PresenceBitmap, PresenceSource};
use crate::error::{SfpError, SfpResult};
use crate::port::PortLayout;
use crate::register::RegisterFile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A contiguous cage range sharing one path template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineGroup {
    pub first_cage: u32,
    pub last_cage: u32,
    pub path: String,
    #[serde(default)]
    pub line_base: u32,
    #[serde(default = "default_line_stride")]
    pub line_stride: u32,
    /// Line reads `0` when asserted.
    #[serde(default)]
    pub active_low: bool,
}

fn default_line_stride() -> u32 {
    1
}

impl LineGroup {
    pub fn new(first_cage: u32, last_cage: u32, path: impl Into<String>) -> Self {
        Self {
            first_cage,
            last_cage,
            path: path.into(),
            line_base: 0,
            line_stride: 1,
            active_low: false,
        }
    }

    /// GPIO numbering: cage `first_cage` is line `base`, then every `stride`.
    pub fn with_lines(mut self, base: u32, stride: u32) -> Self {
        self.line_base = base;
        self.line_stride = stride;
        self
    }

    pub fn active_low(mut self) -> Self {
        self.active_low = true;
        self
    }

    fn covers(&self, cage: u32) -> bool {
        (self.first_cage..=self.last_cage).contains(&cage)
    }

    fn render(&self, port: u32, cage: u32) -> PathBuf {
        let line = self.line_base + (cage - self.first_cage) * self.line_stride;
        PathBuf::from(
            self.path
                .replace("{port}", &port.to_string())
                .replace("{cage}", &cage.to_string())
                .replace("{line}", &line.to_string()),
        )
    }
}

/// Resolved control line of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLine {
    pub path: PathBuf,
    pub active_low: bool,
}

impl ControlLine {
    /// Reads the line and applies polarity.
    pub fn read_asserted<R: RegisterFile>(&self, regs: &R) -> SfpResult<bool> {
        let raw = regs
            .read_line(&self.path)
            .map_err(|e| SfpError::io(&self.path, e))?;
        let level = parse_level(&self.path, &raw)?;
        Ok(level != self.active_low)
    }

    /// Drives the line to the asserted or deasserted level.
    pub fn write_asserted<R: RegisterFile>(&self, regs: &R, asserted: bool) -> SfpResult<()> {
        let level = asserted != self.active_low;
        self.write_raw(regs, if level { "1" } else { "0" })
    }

    /// Writes a literal value.
    pub fn write_raw<R: RegisterFile>(&self, regs: &R, value: &str) -> SfpResult<()> {
        regs.write_line(&self.path, value)
            .map_err(|e| SfpError::io(&self.path, e))
    }
}

/// Parses a `0`/`1` (or `0x0`/`0x1`) node value.
pub fn parse_level(path: &Path, raw: &str) -> SfpResult<bool> {
    let value = raw.trim();
    let digits = value.strip_prefix("0x").unwrap_or(value);
    match u32::from_str_radix(digits, if digits.len() == value.len() { 10 } else { 16 }) {
        Ok(0) => Ok(false),
        Ok(1) => Ok(true),
        _ => Err(SfpError::malformed(
            path,
            format!("expected 0 or 1, found '{}'", value),
        )),
    }
}

/// Line groups for one signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineMap {
    groups: Vec<LineGroup>,
}

impl LineMap {
    pub fn new(groups: Vec<LineGroup>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[LineGroup] {
        &self.groups
    }

    /// The line serving `port`, if any group covers its cage.
    pub fn resolve(&self, ports: &PortLayout, port: u32) -> Option<ControlLine> {
        let cage = ports.cage(port);
        self.groups
            .iter()
            .find(|g| g.covers(cage))
            .map(|g| ControlLine {
                path: g.render(port, cage),
                active_low: g.active_low,
            })
    }

    /// Checks group geometry.
    pub fn validate(&self, field: &str) -> SfpResult<()> {
        for (i, group) in self.groups.iter().enumerate() {
            if group.last_cage < group.first_cage {
                return Err(SfpError::invalid_config(
                    format!("{}[{}]", field, i),
                    format!(
                        "last_cage {} below first_cage {}",
                        group.last_cage, group.first_cage
                    ),
                ));
            }
            if group.path.is_empty() {
                return Err(SfpError::invalid_config(
                    format!("{}[{}].path", field, i),
                    "path template is empty",
                ));
            }
        }
        Ok(())
    }
}

/// Builds the presence bitmap from per-port presence lines, for platforms
/// without a bulk presence node. The result is in logical polarity.
#[derive(Debug, Clone)]
pub struct PerPortPresenceReader<R> {
    regs: R,
    ports: PortLayout,
    lines: LineMap,
}

impl<R: RegisterFile> PerPortPresenceReader<R> {
    pub fn new(regs: R, ports: PortLayout, lines: LineMap) -> Self {
        Self { regs, ports, lines }
    }
}

impl<R: RegisterFile> PresenceSource for PerPortPresenceReader<R> {
    fn read_presence_bitmap(&self) -> SfpResult<PresenceBitmap> {
        let mut bitmap = PresenceBitmap::EMPTY;
        for port in self.ports.ports() {
            let Some(line) = self.lines.resolve(&self.ports, port) else {
                continue;
            };
            if line.read_asserted(&self.regs)? {
                bitmap = bitmap.with(port, true);
            }
        }
        Ok(bitmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::MemoryRegisterFile;

    fn ix8_presence() -> LineMap {
        LineMap::new(vec![
            LineGroup::new(1, 48, "/sys/class/cpld-sfp28/port-{port}/pre_n"),
            LineGroup::new(49, 56, "/sys/class/gpio/gpio{line}/value")
                .with_lines(34, 4)
                .active_low(),
        ])
    }

    #[test]
    fn test_resolve_templates() {
        let ports = PortLayout::with_qsfp(1, 56, 49, 56, 1);
        let map = ix8_presence();
        assert_eq!(
            map.resolve(&ports, 7).unwrap(),
            ControlLine {
                path: PathBuf::from("/sys/class/cpld-sfp28/port-7/pre_n"),
                active_low: false
            }
        );
        assert_eq!(
            map.resolve(&ports, 49).unwrap().path,
            PathBuf::from("/sys/class/gpio/gpio34/value")
        );
        assert_eq!(
            map.resolve(&ports, 56).unwrap().path,
            PathBuf::from("/sys/class/gpio/gpio62/value")
        );
        assert!(map.resolve(&ports, 57).is_none());
    }

    #[test]
    fn test_resolve_uses_cage_for_breakout_ports() {
        let ports = PortLayout::with_qsfp(1, 72, 49, 72, 4);
        let map = LineMap::new(vec![
            LineGroup::new(1, 38, "/sys/bus/i2c/devices/3-0061/module_present_{cage}"),
            LineGroup::new(39, 54, "/sys/bus/i2c/devices/3-0062/module_present_{cage}"),
        ]);
        assert_eq!(
            map.resolve(&ports, 38).unwrap().path,
            PathBuf::from("/sys/bus/i2c/devices/3-0061/module_present_38")
        );
        assert_eq!(
            map.resolve(&ports, 55).unwrap().path,
            PathBuf::from("/sys/bus/i2c/devices/3-0062/module_present_50")
        );
    }

    #[test]
    fn test_parse_level() {
        let p = Path::new("/x");
        assert!(parse_level(p, "1").unwrap());
        assert!(!parse_level(p, "0\n").unwrap());
        assert!(parse_level(p, "0x1").unwrap());
        assert!(!parse_level(p, "0x0").unwrap());
        assert!(parse_level(p, "2").is_err());
        assert!(parse_level(p, "").is_err());
    }

    #[test]
    fn test_active_low_read_and_write() {
        let regs = MemoryRegisterFile::new();
        regs.set_text("/gpio/value", "0");
        let line = ControlLine {
            path: PathBuf::from("/gpio/value"),
            active_low: true,
        };
        assert!(line.read_asserted(&regs).unwrap());
        line.write_asserted(&regs, false).unwrap();
        assert_eq!(regs.text("/gpio/value").unwrap(), "1");
        assert!(!line.read_asserted(&regs).unwrap());
    }

    #[test]
    fn test_per_port_reader() {
        let regs = MemoryRegisterFile::new();
        let ports = PortLayout::with_qsfp(1, 56, 49, 56, 1);
        for port in 1..=48 {
            regs.set_text(format!("/sys/class/cpld-sfp28/port-{}/pre_n", port), "0");
        }
        for i in 0..8 {
            regs.set_text(format!("/sys/class/gpio/gpio{}/value", 34 + i * 4), "1");
        }
        regs.set_text("/sys/class/cpld-sfp28/port-2/pre_n", "1");
        regs.set_text("/sys/class/gpio/gpio38/value", "0");

        let reader = PerPortPresenceReader::new(regs.clone(), ports, ix8_presence());
        let bitmap = reader.read_presence_bitmap().unwrap();
        assert!(bitmap.bit(2));
        assert!(bitmap.bit(50));
        assert_eq!(bitmap.bits().count_ones(), 2);

        regs.set_failing("/sys/class/gpio/gpio62/value", true);
        assert!(reader.read_presence_bitmap().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ix8_presence().validate("presence.lines").is_ok());
        let bad = LineMap::new(vec![LineGroup::new(5, 1, "/x")]);
        assert!(bad.validate("presence.lines").is_err());
        let empty = LineMap::new(vec![LineGroup::new(1, 1, "")]);
        assert!(empty.validate("presence.lines").is_err());
    }
}
