//! Varian TV-301 turbo pump controller protocol.
//!
//! ASCII framed, window addressed request/response protocol spoken over
//! RS-232 or a TCP serial bridge. The caller opens the stream and hands it to
//! [`PumpDriver`]; the driver serializes transactions on it.
//!
//! # Example
//!
//! ```ignore
//! use varian_turbo::varian::{DeviceAddress, PumpDriver};
//!
//! let stream = tokio::net::TcpStream::connect("10.0.0.5:4001").await?;
//! let driver = PumpDriver::new(stream, DeviceAddress::default());
//! let reading = driver.query_status().await?;
//! println!("{}", reading.operational);
//! driver.teardown().await;
//! ```

mod client;
mod error;
mod gate;
mod io;
mod protocol;
mod status;
mod types;

#[cfg(test)]
mod tests;

pub use client::{LinkReservation, PumpDriver, PumpLink};
pub use error::{PumpError, Result};
pub use gate::{Permit, TransactionGate};
pub use protocol::{Request, build_frame, calculate_checksum, encode_request, verify_checksum};
pub use status::{
    ErrorBitmask, ErrorFlag, OperationalStatus, PumpReading, decode_error_bitmask, decode_operational_status,
    parse_numeric,
};
pub use types::{
    DeviceAddress, Direction, GATE_TIMEOUT, MAX_DEVICE_ADDRESS, MAX_RESPONSE_LEN, MAX_STRING_LEN, MAX_WINDOW,
    NUMERIC_WIDTH, Response, Window,
};
