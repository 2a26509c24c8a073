//! PumpDriver struct and public API.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use super::error::{PumpError, Result};
use super::gate::{Permit, TransactionGate};
use super::io::{read_frame_within, write_frame};
use super::protocol::{encode_request, format_bool, format_numeric, format_string};
use super::status::{PumpReading, decode_error_bitmask, decode_operational_status, parse_numeric};
use super::types::{DeviceAddress, Response, Window, hex_dump};

/// Byte stream the driver can talk over: a TCP serial bridge, a serial port,
/// or an in-memory pipe.
pub trait PumpLink: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PumpLink for T {}

type Slot<S> = Option<BufReader<S>>;

/// Driver for a Varian TV-301 controller on an already connected stream.
///
/// Every public operation runs under the transaction gate, so the driver can
/// be shared (for example behind an `Arc`) between a status poller and a
/// command issuer. Nothing is retried; failures go straight to the caller.
pub struct PumpDriver<S> {
    gate: TransactionGate<Slot<S>>,
    address: DeviceAddress,
    read_timeout: Option<Duration>,
}

/// Holds the link for an external shutdown sequence.
///
/// While it is alive no other transaction can start. Dropping it releases the
/// link; [`LinkReservation::close`] tears the stream down first.
pub struct LinkReservation<'a, S: PumpLink> {
    permit: Permit<'a, Slot<S>>,
}

impl<S: PumpLink> PumpDriver<S> {
    /// Wrap a connected stream. The driver does not open or reconnect it.
    pub fn new(stream: S, address: DeviceAddress) -> Self {
        Self {
            gate: TransactionGate::new(Some(BufReader::new(stream))),
            address,
            read_timeout: None,
        }
    }

    /// Bound every response read. Without it the stream's own timeout applies.
    pub fn with_read_timeout(mut self, limit: Duration) -> Self {
        self.read_timeout = Some(limit);
        self
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Read the error-code window, then the operating-status window.
    pub async fn query_status(&self) -> Result<PumpReading> {
        let mut permit = self.gate.acquire().await?;

        let response = self.transact(&mut permit, Window::ERROR_CODE, None).await?;
        let errors = decode_error_bitmask(response.value(Window::ERROR_CODE)?)?;

        let response = self.transact(&mut permit, Window::OPERATING_STATUS, None).await?;
        let operational = decode_operational_status(response.value(Window::OPERATING_STATUS)?)?;

        debug!("Pump status: {operational}, error bits {:#04x}", errors.bits());
        Ok(PumpReading { operational, errors })
    }

    /// Command the pump to start.
    pub async fn start_pump(&self) -> Result<()> {
        info!("Sending start command");
        self.write_bool(Window::START_STOP, true).await
    }

    /// Command the pump to stop.
    pub async fn stop_pump(&self) -> Result<()> {
        info!("Sending stop command");
        self.write_bool(Window::START_STOP, false).await
    }

    /// Read a window and return the frame as received.
    pub async fn read_raw(&self, window: Window) -> Result<Response> {
        let mut permit = self.gate.acquire().await?;
        self.transact(&mut permit, window, None).await
    }

    /// Read a numeric window.
    pub async fn read_numeric(&self, window: Window) -> Result<f64> {
        let response = self.read_raw(window).await?;
        parse_numeric(window, response.value(window)?)
    }

    /// Read a logical window.
    pub async fn read_bool(&self, window: Window) -> Result<bool> {
        let response = self.read_raw(window).await?;
        match response.value(window)? {
            b"1" => Ok(true),
            b"0" => Ok(false),
            other => Err(PumpError::NotABoolean {
                window: window.number(),
                raw: String::from_utf8_lossy(other).into_owned(),
            }),
        }
    }

    pub async fn write_bool(&self, window: Window, value: bool) -> Result<()> {
        self.write_acknowledged(window, format_bool(value)).await
    }

    pub async fn write_numeric(&self, window: Window, value: u32) -> Result<()> {
        let data = format_numeric(value)?;
        self.write_acknowledged(window, &data).await
    }

    /// Write an alphanumeric window (at most ten characters).
    pub async fn write_string(&self, window: Window, value: &str) -> Result<()> {
        let data = format_string(value).inspect_err(|e| error!("Not writing window {window}: {e}"))?;
        self.write_acknowledged(window, &data).await
    }

    /// Take the link and keep it until the reservation is dropped or closed.
    pub async fn reserve(&self) -> Result<LinkReservation<'_, S>> {
        let permit = self.gate.acquire().await?;
        Ok(LinkReservation { permit })
    }

    /// Shut the stream down. Safe to call more than once; never fails.
    pub async fn teardown(&self) {
        match self.reserve().await {
            Ok(reservation) => reservation.close().await,
            Err(e) => error!("Cannot tear down pump link: {e}"),
        }
    }

    async fn write_acknowledged(&self, window: Window, data: &[u8]) -> Result<()> {
        let mut permit = self.gate.acquire().await?;
        let response = self.transact(&mut permit, window, Some(data)).await?;
        if response.is_ack() {
            return Ok(());
        }
        let received = hex_dump(&response.payload);
        warn!("Write to window {window} not acknowledged, received [{received}]");
        Err(PumpError::NotAcknowledged(received))
    }

    /// One request/response cycle on a link the caller already holds.
    ///
    /// A transport failure or a cancelled cycle may leave a reply in flight,
    /// so the stream is dropped and later calls see `Disconnected`.
    async fn transact(&self, slot: &mut Slot<S>, window: Window, data: Option<&[u8]>) -> Result<Response> {
        let frame = encode_request(self.address, window, data)?;
        let mut in_flight = InFlight { slot, settled: false };
        let stream = in_flight.slot.as_mut().ok_or(PumpError::Disconnected)?;

        let result = match write_frame(stream.get_mut(), &frame).await {
            Ok(()) => read_frame_within(stream, self.address.wire_byte(), self.read_timeout).await,
            Err(e) => Err(e),
        };
        in_flight.settled = !matches!(&result, Err(e) if e.is_transport());
        result
    }
}

/// Drops the stream unless the cycle it guards ends cleanly.
struct InFlight<'a, S> {
    slot: &'a mut Slot<S>,
    settled: bool,
}

impl<S> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if !self.settled && self.slot.take().is_some() {
            warn!("Pump link out of step after an interrupted transaction, dropping it");
        }
    }
}

impl<S: PumpLink> LinkReservation<'_, S> {
    /// Shut the stream down while still holding the link.
    pub async fn close(mut self) {
        let Some(mut stream) = self.permit.take() else {
            debug!("Pump link already closed");
            return;
        };
        match stream.get_mut().shutdown().await {
            Ok(()) => info!("Pump link closed"),
            Err(e) => error!("While closing pump link: {e}"),
        }
    }

    /// True while the stream has not been torn down.
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.permit.is_some()
    }
}
