//! Low-level stream I/O: frame writes and the delimiter scanner.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::error::{PumpError, Result};
use super::protocol::verify_checksum;
use super::types::{ETX, MAX_RESPONSE_LEN, Response, STX, hex_dump};

/// Write a complete frame and flush it.
pub(crate) async fn write_frame<W>(stream: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!("TX ({} bytes): {}", frame.len(), hex_dump(frame));
    stream.write_all(frame).await.map_err(|e| {
        error!("Write to pump failed: {e}");
        PumpError::Io(e)
    })?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame, optionally bounded by a deadline.
pub(crate) async fn read_frame_within<R>(
    reader: &mut R,
    expected_address: u8,
    deadline: Option<Duration>,
) -> Result<Response>
where
    R: AsyncRead + Unpin,
{
    match deadline {
        Some(limit) => timeout(limit, read_frame(reader, expected_address))
            .await
            .map_err(|_| {
                error!("No response from pump within {limit:?}");
                PumpError::ReadTimeout(limit)
            })?,
        None => read_frame(reader, expected_address).await,
    }
}

/// Scan the stream for one inbound frame.
///
/// Skips everything up to STX, takes the address byte, collects the payload
/// up to ETX and checks the two trailing checksum digits. A frame from a
/// different address is logged and still returned.
pub(crate) async fn read_frame<R>(reader: &mut R, expected_address: u8) -> Result<Response>
where
    R: AsyncRead + Unpin,
{
    let mut skipped = 0usize;
    while next_byte(reader).await? != STX {
        skipped += 1;
    }
    if skipped > 0 {
        debug!("Discarded {skipped} bytes before start of frame");
    }

    let address = next_byte(reader).await?;

    let mut payload = Vec::new();
    loop {
        let byte = next_byte(reader).await?;
        if byte == ETX {
            break;
        }
        if payload.len() >= MAX_RESPONSE_LEN {
            error!("Response exceeds {MAX_RESPONSE_LEN} bytes without end of frame");
            return Err(PumpError::MalformedFrame(format!(
                "no end of frame within {MAX_RESPONSE_LEN} bytes"
            )));
        }
        payload.push(byte);
    }

    let received = [next_byte(reader).await?, next_byte(reader).await?];
    debug!(
        "RX addr {address:#04x} ({} bytes): {} cc {}",
        payload.len(),
        hex_dump(&payload),
        String::from_utf8_lossy(&received)
    );
    verify_checksum(address, &payload, received).inspect_err(|e| error!("Rejecting response: {e}"))?;

    if address != expected_address {
        warn!("Response from device address {address:#04x}, expected {expected_address:#04x}. Check your setup!");
    }

    Ok(Response { address, payload })
}

async fn next_byte<R>(reader: &mut R) -> Result<u8>
where
    R: AsyncRead + Unpin,
{
    reader.read_u8().await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            error!("Stream closed in the middle of a frame");
            PumpError::ConnectionClosed
        } else {
            error!("Read from pump failed: {e}");
            PumpError::Io(e)
        }
    })
}
