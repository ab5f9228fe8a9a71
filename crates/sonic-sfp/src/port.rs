//! Front-panel port numbering.
//!
//! Ports are numbered `port_start..=port_end`. QSFP ports occupy the high
//! sub-range; on some platforms each QSFP cage is broken out into several
//! consecutive logical ports ("lanes"), all of which map to one cage.

use crate::error::{SfpError, SfpResult};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Highest port number a presence bitmap can carry.
pub const MAX_PORTS: u32 = 128;

/// Port ranges of a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLayout {
    /// First front-panel port.
    pub port_start: u32,
    /// Last front-panel port.
    pub port_end: u32,
    /// First QSFP port (defaults to `port_start`).
    #[serde(default)]
    pub qsfp_port_start: Option<u32>,
    /// Last QSFP port (defaults to `port_end`).
    #[serde(default)]
    pub qsfp_port_end: Option<u32>,
    /// Logical ports sharing one QSFP cage.
    #[serde(default = "default_lanes_per_cage")]
    pub lanes_per_cage: u32,
}

fn default_lanes_per_cage() -> u32 {
    1
}

impl PortLayout {
    /// All ports are QSFP, one port per cage.
    pub fn qsfp_only(port_start: u32, port_end: u32) -> Self {
        Self {
            port_start,
            port_end,
            qsfp_port_start: None,
            qsfp_port_end: None,
            lanes_per_cage: 1,
        }
    }

    /// SFP ports followed by a QSFP block.
    pub fn with_qsfp(
        port_start: u32,
        port_end: u32,
        qsfp_port_start: u32,
        qsfp_port_end: u32,
        lanes_per_cage: u32,
    ) -> Self {
        Self {
            port_start,
            port_end,
            qsfp_port_start: Some(qsfp_port_start),
            qsfp_port_end: Some(qsfp_port_end),
            lanes_per_cage,
        }
    }

    /// First QSFP port.
    pub fn qsfp_start(&self) -> u32 {
        self.qsfp_port_start.unwrap_or(self.port_start)
    }

    /// Last QSFP port.
    pub fn qsfp_end(&self) -> u32 {
        self.qsfp_port_end.unwrap_or(self.port_end)
    }

    /// All ports.
    pub fn ports(&self) -> RangeInclusive<u32> {
        self.port_start..=self.port_end
    }

    /// QSFP ports.
    pub fn qsfp_ports(&self) -> RangeInclusive<u32> {
        self.qsfp_start()..=self.qsfp_end()
    }

    /// Number of ports.
    pub fn len(&self) -> usize {
        (self.port_end - self.port_start + 1) as usize
    }

    /// Always false for a validated layout.
    pub fn is_empty(&self) -> bool {
        self.port_end < self.port_start
    }

    /// Returns true if `port` is QSFP.
    pub fn is_qsfp(&self, port: u32) -> bool {
        self.qsfp_ports().contains(&port)
    }

    /// Rejects ports outside `[port_start, port_end]`.
    pub fn check(&self, port: u32) -> SfpResult<()> {
        if self.ports().contains(&port) {
            Ok(())
        } else {
            Err(SfpError::InvalidPort {
                port,
                first: self.port_start,
                last: self.port_end,
            })
        }
    }

    /// Rejects non-QSFP ports for QSFP-only operations.
    pub fn check_qsfp(&self, port: u32, operation: &'static str) -> SfpResult<()> {
        self.check(port)?;
        if self.is_qsfp(port) {
            Ok(())
        } else {
            Err(SfpError::not_applicable(port, operation))
        }
    }

    /// Physical cage a port lives in.
    pub fn cage(&self, port: u32) -> u32 {
        if self.lanes_per_cage > 1 && self.is_qsfp(port) {
            let start = self.qsfp_start();
            start + (port - start) / self.lanes_per_cage
        } else {
            port
        }
    }

    /// Bitmask with one bit set per configured port.
    pub fn port_mask(&self) -> u128 {
        self.ports().fold(0u128, |mask, port| mask | 1u128 << (port - 1))
    }

    /// Validates ranges.
    pub fn validate(&self) -> SfpResult<()> {
        if self.port_start == 0 {
            return Err(SfpError::invalid_config("ports.port_start", "must be >= 1"));
        }
        if self.port_end < self.port_start {
            return Err(SfpError::invalid_config(
                "ports.port_end",
                format!("{} is below port_start {}", self.port_end, self.port_start),
            ));
        }
        if self.port_end > MAX_PORTS {
            return Err(SfpError::invalid_config(
                "ports.port_end",
                format!("{} exceeds {}", self.port_end, MAX_PORTS),
            ));
        }
        let (qs, qe) = (self.qsfp_start(), self.qsfp_end());
        if qs < self.port_start || qe > self.port_end || qe < qs {
            return Err(SfpError::invalid_config(
                "ports.qsfp_port_start",
                format!(
                    "QSFP range [{}, {}] not inside [{}, {}]",
                    qs, qe, self.port_start, self.port_end
                ),
            ));
        }
        if self.lanes_per_cage == 0 {
            return Err(SfpError::invalid_config("ports.lanes_per_cage", "must be >= 1"));
        }
        Ok(())
    }
}
