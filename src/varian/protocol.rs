//! Varian frame building, checksum calculation and value formatting.
//!
//! Request frame layout:
//!
//! ```text
//! STX | ADDR | W W W | DIR | data... | ETX | C C
//! ```
//!
//! `CC` is the XOR of every byte from `ADDR` through `ETX`, written as two
//! hex digits. Replies use the same envelope with an arbitrary body.

use super::error::{PumpError, Result};
use super::types::{DeviceAddress, Direction, ETX, MAX_STRING_LEN, NUMERIC_WIDTH, STX, Window};

/// XOR checksum over the bytes from the address byte through ETX.
pub fn calculate_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Two lowercase hex digits for a checksum.
pub(crate) fn checksum_digits(checksum: u8) -> [u8; 2] {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    [HEX[(checksum >> 4) as usize], HEX[(checksum & 0x0f) as usize]]
}

/// Wrap `body` in STX/address/ETX and append the checksum.
pub fn build_frame(address: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 5);
    frame.push(STX);
    frame.push(address);
    frame.extend_from_slice(body);
    frame.push(ETX);

    let checksum = calculate_checksum(&frame[1..]);
    frame.extend_from_slice(&checksum_digits(checksum));
    frame
}

/// Encode a request: a read if `data` is `None`, otherwise a write.
///
/// Write data longer than an alphanumeric window value is refused.
pub fn encode_request(address: DeviceAddress, window: Window, data: Option<&[u8]>) -> Result<Vec<u8>> {
    if let Some(data) = data.filter(|d| d.len() > MAX_STRING_LEN) {
        return Err(PumpError::PayloadTooLong {
            len: data.len(),
            max: MAX_STRING_LEN,
        });
    }
    let mut body = Vec::with_capacity(4 + data.map_or(0, <[u8]>::len));
    body.extend_from_slice(&window.digits());
    match data {
        Some(data) => {
            body.push(Direction::Write.byte());
            body.extend_from_slice(data);
        }
        None => body.push(Direction::Read.byte()),
    }
    Ok(build_frame(address.wire_byte(), &body))
}

/// Check the received checksum digits against the frame contents.
///
/// Hex digits are accepted in either case.
pub fn verify_checksum(address: u8, payload: &[u8], received: [u8; 2]) -> Result<()> {
    let computed = address ^ calculate_checksum(payload) ^ ETX;

    let text = String::from_utf8_lossy(&received).into_owned();
    let parsed = std::str::from_utf8(&received)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_hexdigit()))
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .ok_or_else(|| PumpError::MalformedFrame(format!("checksum field {text:?} is not hex")))?;

    if parsed != computed {
        return Err(PumpError::ChecksumMismatch {
            computed,
            received: text,
        });
    }
    Ok(())
}

/// Logical value of a boolean window.
pub fn format_bool(value: bool) -> &'static [u8] {
    if value { b"1" } else { b"0" }
}

/// Numeric window value: six digits, zero padded.
pub fn format_numeric(value: u32) -> Result<Vec<u8>> {
    let text = format!("{value:0width$}", width = NUMERIC_WIDTH);
    if text.len() > NUMERIC_WIDTH {
        return Err(PumpError::PayloadTooLong {
            len: text.len(),
            max: NUMERIC_WIDTH,
        });
    }
    Ok(text.into_bytes())
}

/// Alphanumeric window value: right justified to ten characters, blanks as `_`.
pub fn format_string(value: &str) -> Result<Vec<u8>> {
    if !value.is_ascii() {
        return Err(PumpError::MalformedFrame(format!("{value:?} is not ASCII")));
    }
    if value.len() > MAX_STRING_LEN {
        return Err(PumpError::PayloadTooLong {
            len: value.len(),
            max: MAX_STRING_LEN,
        });
    }
    let padded = format!("{value:>width$}", width = MAX_STRING_LEN);
    Ok(padded.replace(' ', "_").into_bytes())
}

/// A request as seen by the controller side of the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub window: Window,
    pub direction: Direction,
    pub data: Vec<u8>,
}

impl Request {
    /// Parse the body of a request frame (`WWW` + direction + data).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (head, data) = body
            .split_at_checked(4)
            .ok_or_else(|| PumpError::MalformedFrame(format!("request body too short: {} bytes", body.len())))?;

        let number = std::str::from_utf8(&head[..3])
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| PumpError::MalformedFrame("window field is not three digits".to_string()))?;

        let direction = Direction::from_byte(head[3])
            .ok_or_else(|| PumpError::MalformedFrame(format!("unknown direction byte {:#04x}", head[3])))?;

        if direction == Direction::Read && !data.is_empty() {
            return Err(PumpError::MalformedFrame("read request carries data".to_string()));
        }

        Ok(Self {
            window: Window::new(number)?,
            direction,
            data: data.to_vec(),
        })
    }
}
