//! SONiC transceiver (SFP/QSFP) platform support.
//!
//! This crate provides:
//! - Presence change detection over CPLD presence bitmaps ([`PresencePoller`])
//! - Bounded-retry EEPROM access for low-power mode, TX disable and DOM
//!   ([`EepromAccess`])
//! - Per-port CPLD/GPIO control lines for presence, LPMode and reset
//! - Declarative platform descriptions with a built-in table
//!   ([`PlatformConfig`])
//! - A vendor-neutral facade tying it together ([`SfpUtil`])
//!
//! All hardware access goes through [`RegisterFile`] and all waiting through
//! [`Clock`], so tests run against [`MemoryRegisterFile`] and [`ManualClock`].

pub mod bitmap;
pub mod clock;
pub mod config;
pub mod control;
pub mod detector;
pub mod eeprom;
pub mod error;
pub mod poller;
pub mod port;
pub mod register;
pub mod sfp;

pub use bitmap::{BitField, BitLayout, NodeBitmapReader, PresenceBitmap, PresenceSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BitmapSource, ChangeEventConfig, EepromConfig, LpModeConfig, PlatformConfig, PresenceConfig,
    ResetConfig, DEFAULT_CONFIG_PATH,
};
pub use control::{ControlLine, LineGroup, LineMap, PerPortPresenceReader};
pub use detector::{ChangeCache, ChangeDetector, Polarity, PortEvent, PortEvents, PortState};
pub use eeprom::{DomReading, EepromAccess, PowerControl};
pub use error::{SfpError, SfpResult};
pub use poller::{PollStats, PollStrategy, PresencePoller, POLL_INTERVAL};
pub use port::PortLayout;
pub use register::{MemoryRegisterFile, RegisterFile, SysfsRegisterFile};
pub use sfp::{PresenceSampler, SfpUtil, SysfsSfpUtil};
