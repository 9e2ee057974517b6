//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the panel
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Port or bridge could not be opened
    #[error("Failed to open port '{port}': {reason}")]
    PortOpen {
        /// Port name or bridge address
        port: String,
        /// Why the open failed
        reason: String,
    },

    /// Port opened but could not be configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Id does not fit the panel's three digit field
    #[error("Device id {0} is out of range (max 999)")]
    InvalidId(u16),

    /// Command issued after `close`
    #[error("Engine is closed")]
    Closed,

    /// Bulk bitmap contained a non-hex character
    #[error("Invalid hex digit {digit:?} at offset {offset}")]
    InvalidHex {
        /// Offending character
        digit: char,
        /// Position in the trimmed bitmap
        offset: usize,
    },

    /// Transport read or write failed
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
