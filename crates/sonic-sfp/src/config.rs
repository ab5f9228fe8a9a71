//! Declarative platform configuration.
//!
//! A [`PlatformConfig`] describes everything platform specific: port ranges,
//! where presence/LPMode/reset lines live, how the bulk presence bitmap is
//! laid out and how EEPROMs are addressed. Configurations come from the
//! built-in table ([`PlatformConfig::builtin`]) or from a TOML file.
//!
//! ```toml
//! name = "accton_as7716_32x"
//!
//! [ports]
//! port_start = 1
//! port_end = 32
//!
//! [[presence.lines]]
//! first_cage = 1
//! last_cage = 32
//! path = "/sys/bus/i2c/devices/11-0060/module_present_{port}"
//!
//! [presence.change_event]
//! nodes = ["/sys/bus/i2c/devices/11-0060/module_present_all"]
//! strategy = "debounced"
//!
//! [lpmode]
//! mode = "eeprom"
//!
//! [eeprom]
//! path = "/sys/bus/i2c/devices/{bus}-0050/eeprom"
//! i2c_buses = [29, 30, 31, 32, 34, 33, 36, 35, 25, 26, 27, 28, 37, 38, 39, 40,
//!              41, 42, 43, 44, 53, 54, 55, 56, 45, 46, 47, 48, 49, 50, 51, 52]
//! ```

use crate::bitmap::{BitField, BitLayout};
use crate::control::{LineGroup, LineMap};
use crate::detector::Polarity;
use crate::eeprom::{DEFAULT_RETRIES, DEFAULT_SETTLE};
use crate::error::{SfpError, SfpResult};
use crate::poller::PollStrategy;
use crate::port::PortLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where sfputil looks for a platform file when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "/usr/share/sonic/platform/sfputil.toml";

/// Complete platform description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform name.
    pub name: String,

    /// Port ranges.
    pub ports: PortLayout,

    /// Presence lines and change detection.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Low-power mode control.
    #[serde(default)]
    pub lpmode: LpModeConfig,

    /// Module reset control.
    #[serde(default)]
    pub reset: Option<ResetConfig>,

    /// EEPROM addressing.
    pub eeprom: EepromConfig,
}

/// Presence configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Per-port presence lines.
    #[serde(default)]
    pub lines: LineMap,

    /// Bulk change detection; absent when the platform does not support
    /// transceiver change events.
    #[serde(default)]
    pub change_event: Option<ChangeEventConfig>,
}

/// Where the change detector gets its bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitmapSource {
    /// Bulk `module_present_all`-style nodes.
    #[default]
    Nodes,
    /// One read per port through `presence.lines`.
    PerPort,
}

/// Change-event configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeEventConfig {
    #[serde(default)]
    pub source: BitmapSource,

    /// Bulk nodes, lowest ports first.
    #[serde(default)]
    pub nodes: Vec<PathBuf>,

    #[serde(default)]
    pub layout: BitLayout,

    /// Meaning of a set bitmap bit.
    #[serde(default)]
    pub polarity: Polarity,

    #[serde(default)]
    pub strategy: PollStrategy,
}

/// Low-power mode wiring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LpModeConfig {
    /// No LPMode control.
    #[default]
    Unsupported,
    /// Software override through the EEPROM power control byte, with an
    /// optional CPLD LPMode line consulted when override is off.
    Eeprom {
        #[serde(default)]
        fallback: LineMap,
    },
    /// Dedicated LPMode line per cage.
    Line { lines: LineMap },
}

/// Reset line wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetConfig {
    pub lines: LineMap,

    /// Value written to put the module into reset.
    #[serde(default = "default_assert_value")]
    pub assert_value: String,

    /// Value written after `hold_ms` to take it out again. Some CPLDs
    /// self-clear and need no release.
    #[serde(default)]
    pub release_value: Option<String>,

    #[serde(default)]
    pub hold_ms: u64,
}

fn default_assert_value() -> String {
    "0".to_string()
}

impl ResetConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

/// EEPROM addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EepromConfig {
    /// Node path template; `{bus}` and `{port}` are substituted.
    #[serde(default = "default_eeprom_path")]
    pub path: String,

    /// I2C bus per port, starting at `port_start`.
    pub i2c_buses: Vec<u32>,

    /// Extra attempts after a failed access.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay after every access in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_eeprom_path() -> String {
    "/sys/bus/i2c/devices/{bus}-0050/eeprom".to_string()
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE.as_millis() as u64
}

impl EepromConfig {
    fn new(i2c_buses: Vec<u32>) -> Self {
        Self {
            path: default_eeprom_path(),
            i2c_buses,
            retries: default_retries(),
            settle_ms: default_settle_ms(),
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// EEPROM node of `port`; `None` if the port has no bus entry.
    pub fn path_for(&self, ports: &PortLayout, port: u32) -> Option<PathBuf> {
        let index = port.checked_sub(ports.port_start)? as usize;
        let bus = self.i2c_buses.get(index)?;
        Some(PathBuf::from(
            self.path
                .replace("{bus}", &bus.to_string())
                .replace("{port}", &port.to_string()),
        ))
    }
}

impl PlatformConfig {
    /// Parses and validates a TOML platform description.
    pub fn from_toml_str(text: &str) -> SfpResult<Self> {
        let config: PlatformConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML platform file.
    pub fn load(path: impl AsRef<Path>) -> SfpResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| SfpError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Serializes back to TOML.
    pub fn to_toml_string(&self) -> SfpResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SfpError::invalid_config(self.name.clone(), e.to_string()))
    }

    /// Names of the built-in platforms.
    pub fn builtin_names() -> &'static [&'static str] {
        &[
            "accton_as5835_54x",
            "accton_as7712_32x",
            "accton_as7716_32x",
            "quanta_ix8_rglbmc",
        ]
    }

    /// Built-in platform by name.
    pub fn builtin(name: &str) -> SfpResult<Self> {
        match name {
            "accton_as5835_54x" => Ok(accton_as5835_54x()),
            "accton_as7712_32x" => Ok(accton_as7712_32x()),
            "accton_as7716_32x" => Ok(accton_as7716_32x()),
            "quanta_ix8_rglbmc" => Ok(quanta_ix8_rglbmc()),
            _ => Err(SfpError::UnknownPlatform(name.to_string())),
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> SfpResult<()> {
        self.ports.validate()?;

        if self.eeprom.i2c_buses.len() != self.ports.len() {
            return Err(SfpError::invalid_config(
                "eeprom.i2c_buses",
                format!(
                    "{} entries for {} ports",
                    self.eeprom.i2c_buses.len(),
                    self.ports.len()
                ),
            ));
        }
        if !self.eeprom.path.contains("{bus}") && !self.eeprom.path.contains("{port}") {
            return Err(SfpError::invalid_config(
                "eeprom.path",
                "template needs {bus} or {port}",
            ));
        }

        self.presence.lines.validate("presence.lines")?;
        if let Some(event) = &self.presence.change_event {
            match event.source {
                BitmapSource::Nodes if event.nodes.is_empty() => {
                    return Err(SfpError::invalid_config(
                        "presence.change_event.nodes",
                        "at least one node is required",
                    ));
                }
                BitmapSource::PerPort if self.presence.lines.is_empty() => {
                    return Err(SfpError::invalid_config(
                        "presence.change_event.source",
                        "per_port source requires presence.lines",
                    ));
                }
                // Line polarity is already applied per group.
                BitmapSource::PerPort if event.polarity != Polarity::ActiveHigh => {
                    return Err(SfpError::invalid_config(
                        "presence.change_event.polarity",
                        "per_port source reports logical presence; set polarity \
                         on presence.lines instead",
                    ));
                }
                _ => {}
            }
            event.layout.validate(&self.ports)?;
        }

        match &self.lpmode {
            LpModeConfig::Unsupported => {}
            LpModeConfig::Eeprom { fallback } => fallback.validate("lpmode.fallback")?,
            LpModeConfig::Line { lines } => {
                if lines.is_empty() {
                    return Err(SfpError::invalid_config("lpmode.lines", "no lines configured"));
                }
                lines.validate("lpmode.lines")?;
            }
        }

        if let Some(reset) = &self.reset {
            if reset.lines.is_empty() {
                return Err(SfpError::invalid_config("reset.lines", "no lines configured"));
            }
            reset.lines.validate("reset.lines")?;
        }
        Ok(())
    }
}

fn accton_as5835_54x() -> PlatformConfig {
    let cpld = |signal: &str| {
        LineMap::new(vec![
            LineGroup::new(1, 38, format!("/sys/bus/i2c/devices/3-0061/{}_{{cage}}", signal)),
            LineGroup::new(39, 54, format!("/sys/bus/i2c/devices/3-0062/{}_{{cage}}", signal)),
        ])
    };
    let mut buses: Vec<u32> = (42..=89).collect();
    for bus in [28, 29, 26, 30, 31, 27] {
        buses.extend([bus; 4]);
    }

    PlatformConfig {
        name: "accton_as5835_54x".to_string(),
        ports: PortLayout::with_qsfp(1, 72, 49, 72, 4),
        presence: PresenceConfig {
            lines: cpld("module_present"),
            change_event: Some(ChangeEventConfig {
                source: BitmapSource::Nodes,
                nodes: vec![
                    PathBuf::from("/sys/bus/i2c/devices/3-0061/module_present_all"),
                    PathBuf::from("/sys/bus/i2c/devices/3-0062/module_present_all"),
                ],
                // CPLD2 carries ports 1-38 in five bytes; CPLD3 carries
                // ports 39-48 followed by one bit per QSFP cage.
                layout: BitLayout::Fields {
                    fields: vec![
                        BitField::byte(0, 1),
                        BitField::byte(1, 9),
                        BitField::byte(2, 17),
                        BitField::byte(3, 25),
                        BitField::bits(4, 0, 6, 33, 1),
                        BitField::byte(5, 39),
                        BitField::bits(6, 0, 2, 47, 1),
                        BitField::bits(6, 2, 6, 49, 4),
                    ],
                },
                polarity: Polarity::ActiveHigh,
                strategy: PollStrategy::Wait,
            }),
        },
        lpmode: LpModeConfig::Eeprom {
            fallback: cpld("module_lpmode"),
        },
        reset: Some(ResetConfig {
            lines: cpld("module_reset"),
            assert_value: "0".to_string(),
            release_value: Some("1".to_string()),
            hold_ms: 1000,
        }),
        eeprom: EepromConfig::new(buses),
    }
}

fn accton_as7712_32x() -> PlatformConfig {
    let cpld = |signal: &str| {
        LineMap::new(vec![LineGroup::new(
            1,
            32,
            format!("/sys/bus/i2c/devices/4-0060/{}_{{port}}", signal),
        )])
    };

    PlatformConfig {
        name: "accton_as7712_32x".to_string(),
        ports: PortLayout::qsfp_only(1, 32),
        presence: PresenceConfig {
            lines: cpld("module_present"),
            change_event: Some(ChangeEventConfig {
                source: BitmapSource::Nodes,
                nodes: vec![PathBuf::from("/sys/bus/i2c/devices/4-0060/module_present_all")],
                layout: BitLayout::Contiguous,
                polarity: Polarity::ActiveHigh,
                strategy: PollStrategy::Debounced,
            }),
        },
        lpmode: LpModeConfig::Eeprom {
            fallback: LineMap::default(),
        },
        reset: Some(ResetConfig {
            lines: cpld("module_reset"),
            assert_value: "1".to_string(),
            release_value: Some("0".to_string()),
            hold_ms: 1000,
        }),
        eeprom: EepromConfig::new(vec![
            22, 23, 24, 25, 27, 26, 29, 28, 18, 19, 20, 21, 30, 31, 32, 33, 34, 35, 36, 37, 46,
            47, 48, 49, 38, 39, 40, 41, 42, 43, 44, 45,
        ]),
    }
}

fn accton_as7716_32x() -> PlatformConfig {
    let cpld = |signal: &str| {
        LineMap::new(vec![LineGroup::new(
            1,
            32,
            format!("/sys/bus/i2c/devices/11-0060/{}_{{port}}", signal),
        )])
    };

    PlatformConfig {
        name: "accton_as7716_32x".to_string(),
        ports: PortLayout::qsfp_only(1, 32),
        presence: PresenceConfig {
            lines: cpld("module_present"),
            change_event: Some(ChangeEventConfig {
                source: BitmapSource::Nodes,
                nodes: vec![PathBuf::from("/sys/bus/i2c/devices/11-0060/module_present_all")],
                layout: BitLayout::Contiguous,
                polarity: Polarity::ActiveHigh,
                strategy: PollStrategy::Debounced,
            }),
        },
        lpmode: LpModeConfig::Eeprom {
            fallback: LineMap::default(),
        },
        reset: Some(ResetConfig {
            lines: cpld("module_reset"),
            assert_value: "1".to_string(),
            release_value: None,
            hold_ms: 0,
        }),
        eeprom: EepromConfig::new(vec![
            29, 30, 31, 32, 34, 33, 36, 35, 25, 26, 27, 28, 37, 38, 39, 40, 41, 42, 43, 44, 53,
            54, 55, 56, 45, 46, 47, 48, 49, 50, 51, 52,
        ]),
    }
}

fn quanta_ix8_rglbmc() -> PlatformConfig {
    let gpio = |base: u32| {
        LineGroup::new(49, 56, "/sys/class/gpio/gpio{line}/value").with_lines(base, 4)
    };

    PlatformConfig {
        name: "quanta_ix8_rglbmc".to_string(),
        ports: PortLayout::with_qsfp(1, 56, 49, 56, 1),
        presence: PresenceConfig {
            lines: LineMap::new(vec![
                LineGroup::new(1, 48, "/sys/class/cpld-sfp28/port-{port}/pre_n"),
                gpio(34).active_low(),
            ]),
            change_event: Some(ChangeEventConfig {
                source: BitmapSource::PerPort,
                strategy: PollStrategy::Wait,
                ..ChangeEventConfig::default()
            }),
        },
        lpmode: LpModeConfig::Line {
            lines: LineMap::new(vec![gpio(35)]),
        },
        reset: Some(ResetConfig {
            lines: LineMap::new(vec![gpio(32)]),
            assert_value: "0".to_string(),
            release_value: Some("1".to_string()),
            hold_ms: 2000,
        }),
        eeprom: EepromConfig::new((32..=87).collect()),
    }
}
