//! Varian TV-301 protocol types and constants.

use std::fmt;
use std::time::Duration;

use super::error::{PumpError, Result};

// Framing bytes
pub(crate) const STX: u8 = 0x02;
pub(crate) const ETX: u8 = 0x03;
pub(crate) const ACK: u8 = 0x06;
pub(crate) const ADDR_BASE: u8 = 0x80;
pub(crate) const DIR_READ: u8 = 0x30;
pub(crate) const DIR_WRITE: u8 = 0x31;

// Windows
pub(crate) const WIN_START_STOP: u16 = 100;
pub(crate) const WIN_OPERATING_STATUS: u16 = 205;
pub(crate) const WIN_ERROR_CODE: u16 = 206;

/// Highest addressable window number (3 ASCII digits).
pub const MAX_WINDOW: u16 = 999;
/// Highest RS-485 device address offset (the wire byte stays within 0x80..=0x9F).
pub const MAX_DEVICE_ADDRESS: u8 = 31;
/// Maximum length of an alphanumeric window value.
pub const MAX_STRING_LEN: usize = 10;
/// Width of a numeric window value.
pub const NUMERIC_WIDTH: usize = 6;
/// Upper bound on bytes accepted between address and ETX of an inbound frame.
pub const MAX_RESPONSE_LEN: usize = 256;
/// How long a caller waits for the transaction gate before giving up.
pub const GATE_TIMEOUT: Duration = Duration::from_millis(500);

/// A parameter or command slot on the controller, 0..=999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window(u16);

impl Window {
    /// Start/stop command window.
    pub const START_STOP: Window = Window(WIN_START_STOP);
    /// Operating status window (numeric, 0-6).
    pub const OPERATING_STATUS: Window = Window(WIN_OPERATING_STATUS);
    /// Error code window (numeric, 8-bit fault mask).
    pub const ERROR_CODE: Window = Window(WIN_ERROR_CODE);

    /// Create a window, rejecting numbers that do not fit three digits.
    pub fn new(number: u16) -> Result<Self> {
        if number > MAX_WINDOW {
            return Err(PumpError::InvalidWindow(number));
        }
        Ok(Self(number))
    }

    pub fn number(self) -> u16 {
        self.0
    }

    /// Three ASCII digits as they appear on the wire.
    pub fn digits(self) -> [u8; 3] {
        let n = self.0;
        [
            b'0' + (n / 100) as u8,
            b'0' + (n / 10 % 10) as u8,
            b'0' + (n % 10) as u8,
        ]
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Device address offset; the wire byte is `0x80 + offset`.
///
/// RS-232 links always use offset 0. Multi-drop dispatch is not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub fn new(offset: u8) -> Result<Self> {
        if offset > MAX_DEVICE_ADDRESS {
            return Err(PumpError::InvalidAddress(offset));
        }
        Ok(Self(offset))
    }

    pub fn offset(self) -> u8 {
        self.0
    }

    pub fn wire_byte(self) -> u8 {
        ADDR_BASE + self.0
    }
}

/// Request direction byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn byte(self) -> u8 {
        match self {
            Direction::Read => DIR_READ,
            Direction::Write => DIR_WRITE,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            DIR_READ => Some(Direction::Read),
            DIR_WRITE => Some(Direction::Write),
            _ => None,
        }
    }
}

/// One inbound frame as extracted from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Address byte observed on the wire.
    pub address: u8,
    /// Everything between the address byte and ETX.
    pub payload: Vec<u8>,
}

impl Response {
    /// True if the frame is the single-byte acknowledgment.
    pub fn is_ack(&self) -> bool {
        self.payload == [ACK]
    }

    /// Value bytes for a read of `window`.
    ///
    /// Controllers echo the request header (`WWW` + direction) in front of the
    /// data; strip it when present. A reply that echoes a different window
    /// with a logical, numeric or alphanumeric value belongs to another
    /// request and is rejected.
    pub fn value(&self, window: Window) -> Result<&[u8]> {
        let Some((head, rest)) = self.payload.split_at_checked(4) else {
            return Ok(&self.payload);
        };
        let echoed = head[..3].iter().all(u8::is_ascii_digit) && Direction::from_byte(head[3]).is_some();
        if !echoed || rest.is_empty() {
            return Ok(&self.payload);
        }
        if head[..3] == window.digits() {
            return Ok(rest);
        }
        if matches!(rest.len(), 1 | NUMERIC_WIDTH | MAX_STRING_LEN) {
            return Err(PumpError::MalformedFrame(format!(
                "reply for window {} while reading window {window}",
                String::from_utf8_lossy(&head[..3])
            )));
        }
        Ok(&self.payload)
    }
}

/// Render bytes as a spaced hex dump for logging.
pub(crate) fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
