//! Presence bitmap assembly.
//!
//! CPLDs expose module-present lines in bulk as `module_present_all`-style
//! nodes: one line of whitespace-separated hex chunks, lowest ports first.
//! Chunks from several nodes are concatenated in declaration order into one
//! byte stream where byte 0 holds the lowest ports. A [`BitLayout`] then maps
//! that stream onto a [`PresenceBitmap`] where bit `port - 1` belongs to
//! `port`.
//!
//! Layouts exist because CPLD chunks are not always byte aligned to ports.
//! The AS5835-54X, for instance, reports ports 1-38 from one CPLD and ports
//! 39-48 plus six QSFP cage bits from another, so the raw stream has gaps
//! that must be closed and the QSFP cage bits spread onto the first lane of
//! each 4-lane breakout.

use crate::error::{SfpError, SfpResult};
use crate::port::PortLayout;
use crate::register::RegisterFile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitXor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One bit per port; bit `port - 1` carries `port`'s present line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresenceBitmap(pub u128);

impl PresenceBitmap {
    pub const EMPTY: PresenceBitmap = PresenceBitmap(0);

    /// Raw value.
    pub fn bits(self) -> u128 {
        self.0
    }

    /// Bit for `port` (1-based).
    pub fn bit(self, port: u32) -> bool {
        (1..=128).contains(&port) && self.0 & Self::mask(port) != 0
    }

    /// Returns a copy with `port`'s bit set to `value`.
    pub fn with(self, port: u32, value: bool) -> Self {
        if port == 0 || port > 128 {
            return self;
        }
        if value {
            Self(self.0 | Self::mask(port))
        } else {
            Self(self.0 & !Self::mask(port))
        }
    }

    /// Returns true if no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn mask(port: u32) -> u128 {
        1u128 << (port - 1)
    }
}

impl BitXor for PresenceBitmap {
    type Output = PresenceBitmap;

    fn bitxor(self, rhs: Self) -> Self::Output {
        PresenceBitmap(self.0 ^ rhs.0)
    }
}

impl fmt::Display for PresenceBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u128> for PresenceBitmap {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

/// Placement of a run of raw bits onto ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitField {
    /// Index into the concatenated raw byte stream.
    pub byte: usize,
    /// First bit taken from that byte.
    #[serde(default)]
    pub shift: u8,
    /// Number of bits taken.
    #[serde(default = "default_width")]
    pub width: u8,
    /// Port receiving the first bit.
    pub port: u32,
    /// Port distance between consecutive bits.
    #[serde(default = "default_stride")]
    pub stride: u32,
}

fn default_width() -> u8 {
    8
}

fn default_stride() -> u32 {
    1
}

impl BitField {
    /// A whole byte mapped onto eight consecutive ports.
    pub fn byte(byte: usize, port: u32) -> Self {
        Self {
            byte,
            shift: 0,
            width: 8,
            port,
            stride: 1,
        }
    }

    /// `width` bits from `shift` mapped onto ports `stride` apart.
    pub fn bits(byte: usize, shift: u8, width: u8, port: u32, stride: u32) -> Self {
        Self {
            byte,
            shift,
            width,
            port,
            stride,
        }
    }

    fn last_port(&self) -> u32 {
        self.port + u32::from(self.width.saturating_sub(1)) * self.stride
    }

    /// Ports this field reports on.
    pub fn ports(&self) -> impl Iterator<Item = u32> + '_ {
        (0..u32::from(self.width)).map(move |j| self.port + j * self.stride)
    }
}

/// How the raw byte stream maps onto ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BitLayout {
    /// Stream bit `i` is port `i + 1`.
    #[default]
    Contiguous,
    /// Explicit per-field placement.
    Fields {
        /// Fields, applied in order.
        fields: Vec<BitField>,
    },
}

impl BitLayout {
    /// Builds a bitmap from the raw byte stream. `source` names the node(s)
    /// for error messages.
    pub fn assemble(&self, bytes: &[u8], source: &Path) -> SfpResult<PresenceBitmap> {
        match self {
            BitLayout::Contiguous => {
                let value = bytes
                    .iter()
                    .take(16)
                    .enumerate()
                    .fold(0u128, |acc, (i, b)| acc | u128::from(*b) << (8 * i));
                Ok(PresenceBitmap(value))
            }
            BitLayout::Fields { fields } => {
                let mut bitmap = PresenceBitmap::EMPTY;
                for field in fields {
                    let raw = *bytes.get(field.byte).ok_or_else(|| {
                        SfpError::malformed(
                            source,
                            format!(
                                "layout references byte {} but register holds {} bytes",
                                field.byte,
                                bytes.len()
                            ),
                        )
                    })?;
                    for j in 0..field.width {
                        let shift = u32::from(field.shift) + u32::from(j);
                        if raw.checked_shr(shift).unwrap_or(0) & 1 == 1 {
                            let port = field.port + u32::from(j) * field.stride;
                            bitmap = bitmap.with(port, true);
                        }
                    }
                }
                Ok(bitmap)
            }
        }
    }

    /// Mask of the ports that have a bit in this layout. Breakout lanes
    /// behind a single cage bit are not covered.
    pub fn coverage(&self, ports: &PortLayout) -> u128 {
        match self {
            BitLayout::Contiguous => ports.port_mask(),
            BitLayout::Fields { fields } => {
                let covered = fields
                    .iter()
                    .flat_map(|field| field.ports())
                    .fold(PresenceBitmap::EMPTY, |bitmap, port| bitmap.with(port, true));
                covered.bits() & ports.port_mask()
            }
        }
    }

    /// Checks field geometry against the port layout.
    pub fn validate(&self, ports: &PortLayout) -> SfpResult<()> {
        let BitLayout::Fields { fields } = self else {
            return Ok(());
        };
        if fields.is_empty() {
            return Err(SfpError::invalid_config(
                "presence.layout.fields",
                "at least one field is required",
            ));
        }
        for (i, field) in fields.iter().enumerate() {
            let name = format!("presence.layout.fields[{}]", i);
            if field.width == 0 || u32::from(field.shift) + u32::from(field.width) > 8 {
                return Err(SfpError::invalid_config(
                    name,
                    format!(
                        "bits {}..{} do not fit in a byte",
                        field.shift,
                        u32::from(field.shift) + u32::from(field.width)
                    ),
                ));
            }
            if field.stride == 0 {
                return Err(SfpError::invalid_config(name, "stride must be >= 1"));
            }
            if field.port < ports.port_start || field.last_port() > ports.port_end {
                return Err(SfpError::invalid_config(
                    name,
                    format!(
                        "ports {}..={} outside [{}, {}]",
                        field.port,
                        field.last_port(),
                        ports.port_start,
                        ports.port_end
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Parses one bitmap line into bytes, lowest chunk first.
///
/// Each whitespace-separated token is a hex number (optionally `0x`
/// prefixed) and contributes `ceil(digits / 2)` bytes, least significant
/// first.
pub fn parse_chunks(path: &Path, line: &str) -> SfpResult<Vec<u8>> {
    let mut bytes = Vec::new();
    for token in line.split_whitespace() {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(SfpError::malformed(
                path,
                format!("'{}' is not a hex chunk", token),
            ));
        }
        let padded = if digits.len() % 2 == 1 {
            format!("0{}", digits)
        } else {
            digits.to_string()
        };
        for pair in padded.as_bytes().rchunks(2) {
            let text = std::str::from_utf8(pair)
                .map_err(|_| SfpError::malformed(path, "non-ASCII chunk"))?;
            let byte = u8::from_str_radix(text, 16)
                .map_err(|e| SfpError::malformed(path, e.to_string()))?;
            bytes.push(byte);
        }
    }
    if bytes.is_empty() {
        return Err(SfpError::malformed(path, "empty bitmap"));
    }
    Ok(bytes)
}

/// Anything that can sample the presence bitmap.
pub trait PresenceSource {
    fn read_presence_bitmap(&self) -> SfpResult<PresenceBitmap>;
}

/// Reads bulk presence nodes and applies a [`BitLayout`].
#[derive(Debug, Clone)]
pub struct NodeBitmapReader<R> {
    regs: R,
    nodes: Vec<PathBuf>,
    layout: BitLayout,
    port_mask: u128,
    min_bytes: usize,
}

impl<R: RegisterFile> NodeBitmapReader<R> {
    pub fn new(regs: R, nodes: Vec<PathBuf>, layout: BitLayout, ports: &PortLayout) -> Self {
        // Field layouts check their own byte indices.
        let min_bytes = match layout {
            BitLayout::Contiguous => ports.port_end.div_ceil(8) as usize,
            BitLayout::Fields { .. } => 0,
        };
        Self {
            regs,
            nodes,
            layout,
            port_mask: ports.port_mask(),
            min_bytes,
        }
    }

    pub fn nodes(&self) -> &[PathBuf] {
        &self.nodes
    }

    fn read_raw(&self) -> SfpResult<Vec<u8>> {
        let mut bytes = Vec::new();
        for node in &self.nodes {
            let line = self
                .regs
                .read_line(node)
                .map_err(|e| SfpError::io(node, e))?;
            bytes.extend(parse_chunks(node, &line)?);
        }
        Ok(bytes)
    }
}

impl<R: RegisterFile> PresenceSource for NodeBitmapReader<R> {
    fn read_presence_bitmap(&self) -> SfpResult<PresenceBitmap> {
        let raw = self.read_raw()?;
        let source = self.nodes.first().map(PathBuf::as_path).unwrap_or(Path::new(""));
        if raw.len() < self.min_bytes {
            return Err(SfpError::malformed(
                source,
                format!(
                    "register holds {} bytes, {} needed for every port",
                    raw.len(),
                    self.min_bytes
                ),
            ));
        }
        let bitmap = self.layout.assemble(&raw, source)?;
        let bitmap = PresenceBitmap(bitmap.bits() & self.port_mask);
        debug!(raw = ?raw, bitmap = %bitmap, "sampled presence bitmap");
        Ok(bitmap)
    }
}
