//! Error types for the acquisition pipeline

use thiserror::Error;

/// Error type for a single bus transaction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Addressed device did not acknowledge (absent device or bus fault)
    #[error("No acknowledge from device at 0x{address:02X}")]
    NoAck { address: u8 },

    /// Fewer bytes came back than were requested
    #[error("Truncated read: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// USB-to-I2C adapter reported a driver-level failure
    #[error("Adapter error: {status} ({description})")]
    Adapter { status: u32, description: String },
}

/// Error raised while bringing up one sensor channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    /// WHO_AM_I register did not hold the expected identity
    #[error("Invalid WHO_AM_I response: expected 0x{expected:02X}, got 0x{actual:02X}")]
    IdentityMismatch { expected: u8, actual: u8 },

    /// Bus failure during probe, wake or configuration
    #[error("Bus error during init: {0}")]
    Bus(#[from] BusError),
}

/// Invalid static configuration, rejected before the loop starts
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are individually well-formed but not usable together
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Result type for bus transactions
pub type Result<T> = std::result::Result<T, BusError>;
