//! Error types for transceiver operations.
//!
//! Every fallible operation in this crate returns [`SfpResult`]. The
//! boolean plugin-style entry points on [`crate::SfpUtil`] collapse these
//! into `false` after logging, so no error crosses that boundary.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for transceiver operations.
pub type SfpResult<T> = Result<T, SfpError>;

/// Errors that can occur while talking to transceiver registers.
#[derive(Debug, Error)]
pub enum SfpError {
    /// Port number outside the configured range.
    #[error("Port {port} out of range [{first}, {last}]")]
    InvalidPort {
        /// The requested port.
        port: u32,
        /// First valid port.
        first: u32,
        /// Last valid port.
        last: u32,
    },

    /// Operation does not apply to this port (e.g. low-power mode on SFP).
    #[error("Operation '{operation}' not applicable to port {port}")]
    NotApplicable {
        /// The port the operation was attempted on.
        port: u32,
        /// The operation name.
        operation: &'static str,
    },

    /// No module is inserted in the cage.
    #[error("No transceiver present in port {port}")]
    NotPresent {
        /// The port.
        port: u32,
    },

    /// Negative poll timeout.
    #[error("Invalid timeout value: {0}ms")]
    InvalidTimeout(i64),

    /// Poll deadline could not be computed from the current time.
    #[error("Clock skew or time wrap while computing poll deadline (timeout {timeout_ms}ms)")]
    ClockSkew {
        /// The requested timeout.
        timeout_ms: i64,
    },

    /// Register node could not be opened, read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The register node.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Register node contents could not be parsed.
    #[error("Malformed register {}: {message}", path.display())]
    MalformedRegister {
        /// The register node.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },

    /// Platform configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Platform configuration file could not be parsed.
    #[error("Failed to parse platform configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Requested EEPROM bytes fall outside the addressable page.
    #[error("EEPROM range {offset}+{len} exceeds {size} bytes")]
    EepromRange {
        /// First byte requested.
        offset: u64,
        /// Number of bytes requested.
        len: usize,
        /// Addressable size.
        size: u64,
    },

    /// No built-in platform with this name.
    #[error("Unknown platform '{0}'")]
    UnknownPlatform(String),

    /// The platform has no wiring for this operation.
    #[error("Operation '{operation}' not supported on this platform")]
    Unsupported {
        /// The operation name.
        operation: &'static str,
    },
}

impl SfpError {
    /// Creates an I/O error for a register node.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a malformed register error.
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MalformedRegister {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a not-applicable error.
    pub fn not_applicable(port: u32, operation: &'static str) -> Self {
        Self::NotApplicable { port, operation }
    }

    /// Returns true if this error indicates a transient hardware condition
    /// that may succeed on the next poll cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SfpError::Io { .. } | SfpError::MalformedRegister { .. } | SfpError::NotPresent { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_port_display() {
        let err = SfpError::InvalidPort {
            port: 33,
            first: 1,
            last: 32,
        };
        assert_eq!(err.to_string(), "Port 33 out of range [1, 32]");
    }

    #[test]
    fn test_eeprom_range_display() {
        let err = SfpError::EepromRange {
            offset: 200,
            len: 100,
            size: 256,
        };
        assert_eq!(err.to_string(), "EEPROM range 200+100 exceeds 256 bytes");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_error_display() {
        let err = SfpError::io(
            "/sys/bus/i2c/devices/4-0060/module_present_all",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert!(err.to_string().contains("module_present_all"));
        assert!(err.to_string().contains("No such file"));
    }

    #[test]
    fn test_is_transient() {
        assert!(SfpError::io("/x", io::Error::from(io::ErrorKind::Other)).is_transient());
        assert!(SfpError::malformed("/x", "empty").is_transient());
        assert!(!SfpError::InvalidTimeout(-1).is_transient());
        assert!(!SfpError::not_applicable(1, "lpmode").is_transient());
    }
}
