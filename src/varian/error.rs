//! Pump protocol error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the pump controller.
#[derive(Error, Debug)]
pub enum PumpError {
    /// IO error while writing a request or reading a response.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended before a complete frame was read.
    #[error("Connection closed before end of frame")]
    ConnectionClosed,

    /// No complete response within the driver read deadline.
    #[error("Timed out after {0:?} waiting for response")]
    ReadTimeout(Duration),

    /// Another transaction held the link for the whole gate timeout.
    #[error("Link busy: gate not acquired within {0:?}")]
    GateTimeout(Duration),

    /// Received checksum does not match the frame contents.
    #[error("Checksum mismatch: computed {computed:02x}, received {received}")]
    ChecksumMismatch { computed: u8, received: String },

    /// Inbound bytes do not form a valid frame.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Value does not fit the window field.
    #[error("Payload too long: {len} characters (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    /// Window number outside 0..=999.
    #[error("Invalid window: {0}")]
    InvalidWindow(u16),

    /// Device address offset outside the supported range.
    #[error("Invalid device address: {0}")]
    InvalidAddress(u8),

    /// Numeric window returned something that is not a number.
    #[error("Window {window}: response {raw:?} is not a number")]
    NotANumber { window: u16, raw: String },

    /// Logical window returned something other than 0 or 1.
    #[error("Window {window}: response {raw:?} is not a logical value")]
    NotABoolean { window: u16, raw: String },

    /// Command was answered with something other than ACK.
    #[error("Command not acknowledged, received [{0}]")]
    NotAcknowledged(String),

    /// Operation attempted after teardown.
    #[error("Driver has been torn down")]
    Disconnected,
}

impl PumpError {
    /// True for failures of the byte stream itself rather than of the content.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PumpError::Io(_) | PumpError::ConnectionClosed | PumpError::ReadTimeout(_) | PumpError::Disconnected
        )
    }
}

/// Result type for pump protocol operations.
pub type Result<T> = std::result::Result<T, PumpError>;
