//! Presence change detection.
//!
//! [`ChangeDetector::diff`] compares a freshly sampled bitmap with the cached
//! one and emits one [`PortEvent`] per flipped port bit.

use crate::bitmap::PresenceBitmap;
use crate::port::PortLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Transceiver status as reported to xcvrd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortState {
    /// Module removed from the cage.
    #[serde(rename = "0")]
    Removed,
    /// Module inserted into the cage.
    #[serde(rename = "1")]
    Inserted,
}

impl PortState {
    /// Status string used in xcvrd port dictionaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Removed => "0",
            PortState::Inserted => "1",
        }
    }

    /// Returns true for [`PortState::Inserted`].
    pub fn is_present(&self) -> bool {
        matches!(self, PortState::Inserted)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PortState::Removed => "removed",
            PortState::Inserted => "inserted",
        })
    }
}

/// A single presence transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEvent {
    pub port: u32,
    pub state: PortState,
}

/// Events of one poll cycle, keyed by port.
pub type PortEvents = BTreeMap<u32, PortState>;

/// Electrical meaning of a set presence bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Bit set means module present.
    #[default]
    ActiveHigh,
    /// Bit clear means module present.
    ActiveLow,
}

impl Polarity {
    /// Interprets a raw bit.
    pub fn state(self, bit: bool) -> PortState {
        match (self, bit) {
            (Polarity::ActiveHigh, true) | (Polarity::ActiveLow, false) => PortState::Inserted,
            _ => PortState::Removed,
        }
    }
}

/// Last observed presence bitmap.
///
/// Owned by exactly one poller; never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCache {
    valid: bool,
    last_sample_time: Duration,
    present: PresenceBitmap,
}

impl ChangeCache {
    /// Invalid cache holding `present` as the assumed previous state.
    pub fn new(present: PresenceBitmap) -> Self {
        Self {
            valid: false,
            last_sample_time: Duration::ZERO,
            present,
        }
    }

    /// True once a change has been recorded.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Time of the last recorded change.
    pub fn last_sample_time(&self) -> Duration {
        self.last_sample_time
    }

    /// Bitmap as of [`Self::last_sample_time`].
    pub fn present(&self) -> PresenceBitmap {
        self.present
    }

    fn record(&mut self, present: PresenceBitmap, now: Duration) {
        self.present = present;
        self.last_sample_time = now;
        self.valid = true;
    }
}

/// Diffs sampled bitmaps for a fixed port range and polarity.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    ports: PortLayout,
    polarity: Polarity,
    reported: u128,
}

impl ChangeDetector {
    pub fn new(ports: PortLayout, polarity: Polarity) -> Self {
        let reported = ports.port_mask();
        Self {
            ports,
            polarity,
            reported,
        }
    }

    /// Restricts the ports the bitmap source actually reports on. Ports
    /// outside the mask always sample as a clear bit.
    pub fn with_reported(mut self, mask: u128) -> Self {
        self.reported = mask & self.ports.port_mask();
        self
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Cache describing "no module inserted anywhere" in raw polarity, so
    /// the first sample reports every inserted module.
    pub fn initial_cache(&self) -> ChangeCache {
        let empty = match self.polarity {
            Polarity::ActiveHigh => PresenceBitmap::EMPTY,
            Polarity::ActiveLow => PresenceBitmap(self.reported),
        };
        ChangeCache::new(empty)
    }

    /// Emits one event per port whose bit differs between the cache and
    /// `sample`, then stores `sample` in the cache. An identical sample
    /// leaves the cache untouched.
    pub fn diff(
        &self,
        sample: PresenceBitmap,
        cache: &mut ChangeCache,
        now: Duration,
    ) -> Vec<PortEvent> {
        let changed = cache.present ^ sample;
        if changed.is_empty() {
            return Vec::new();
        }

        let events = self
            .ports
            .ports()
            .filter(|&port| changed.bit(port))
            .map(|port| PortEvent {
                port,
                state: self.polarity.state(sample.bit(port)),
            })
            .collect();

        cache.record(sample, now);
        events
    }
}
