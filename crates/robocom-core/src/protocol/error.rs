//! Protocol errors

use thiserror::Error;

use super::ProtocolVersion;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No response with the awaited task id arrived in time
    #[error("No response to task {task_id} after {waited_ms}ms")]
    Timeout {
        /// Task id that was being waited for
        task_id: u16,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// The engine thread has stopped or lost its transport
    #[error("Link is down: {0}")]
    LinkDown(String),

    /// A frame carried a type id the selected version does not define
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// The message exists in one protocol version but not the selected one
    #[error("{message} is not part of the {version:?} protocol")]
    UnsupportedMessage {
        /// Name of the message type
        message: &'static str,
        /// Version that lacks it
        version: ProtocolVersion,
    },

    /// A payload ended before all of its fields were read
    #[error("Payload too short: expected at least {expected} bytes, got {actual}")]
    PayloadTooShort {
        /// Bytes needed to read the next field
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// An encoded payload does not fit in one frame
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Link settings could not be loaded or saved
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No serial port with the given name exists
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Transport read or write failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
