//! Driver tests against a simulated controller.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;

use super::io::read_frame;
use super::types::ACK;
use super::*;
use crate::status::PumpStatus;

const NACK: u8 = 0x15;

/// Controller simulator: answers each expected request with a canned reply.
fn spawn_device(device: DuplexStream, script: Vec<(u16, Vec<u8>)>) -> JoinHandle<Vec<Request>> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(device);
        let mut seen = Vec::new();
        for (window, reply) in script {
            let frame = read_frame(&mut reader, 0x80).await.expect("request frame");
            let request = Request::parse(&frame.payload).expect("request body");
            assert_eq!(request.window.number(), window);
            reader
                .get_mut()
                .write_all(&build_frame(0x80, &reply))
                .await
                .expect("reply");
            seen.push(request);
        }
        seen
    })
}

fn driver_pair() -> (PumpDriver<DuplexStream>, DuplexStream) {
    let (host, device) = tokio::io::duplex(256);
    (PumpDriver::new(host, DeviceAddress::default()), device)
}

/// Stream whose writes always fail, as after a pulled cable.
struct BrokenLink;

impl AsyncRead for BrokenLink {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for BrokenLink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_query_status_reads_error_then_operating_window() {
    let (driver, device) = driver_pair();
    let sim = spawn_device(
        device,
        vec![(206, b"2060000005".to_vec()), (205, b"2050000005".to_vec())],
    );

    let reading = driver.query_status().await.unwrap();
    assert_eq!(reading.operational, OperationalStatus::Normal);
    assert!(reading.errors.contains(ErrorFlag::NoConnect));
    assert!(reading.errors.contains(ErrorFlag::ControllerOvertemp));
    assert_eq!(reading.errors.active().count(), 2);

    let seen = sim.await.unwrap();
    assert!(seen.iter().all(|r| r.direction == Direction::Read && r.data.is_empty()));
}

#[tokio::test]
async fn test_query_status_bare_values() {
    let (driver, device) = driver_pair();
    let sim = spawn_device(device, vec![(206, b"0".to_vec()), (205, b"6".to_vec())]);

    let reading = driver.query_status().await.unwrap();
    assert_eq!(reading.operational, OperationalStatus::Fail);
    assert!(reading.errors.is_clear());
    sim.await.unwrap();
}

#[tokio::test]
async fn test_start_and_stop_write_command_window() {
    let (driver, device) = driver_pair();
    let sim = spawn_device(device, vec![(100, vec![ACK]), (100, vec![ACK])]);

    driver.start_pump().await.unwrap();
    driver.stop_pump().await.unwrap();

    let seen = sim.await.unwrap();
    assert_eq!(seen[0].direction, Direction::Write);
    assert_eq!(seen[0].data, b"1");
    assert_eq!(seen[1].data, b"0");
}

#[tokio::test]
async fn test_start_rejected_by_controller() {
    let (driver, device) = driver_pair();
    let sim = spawn_device(device, vec![(100, vec![NACK])]);

    let result = driver.start_pump().await;
    assert!(matches!(result, Err(PumpError::NotAcknowledged(ref raw)) if raw == "15"));
    sim.await.unwrap();
}

#[tokio::test]
async fn test_start_without_reply_is_a_failure() {
    let (driver, mut device) = driver_pair();
    let sim = tokio::spawn(async move {
        let mut request = [0u8; 10];
        device.read_exact(&mut request).await.unwrap();
        // hang up instead of acknowledging
    });

    let result = driver.start_pump().await;
    sim.await.unwrap();
    let err = result.unwrap_err();
    assert!(err.is_transport(), "unexpected error {err:?}");
}

#[tokio::test]
async fn test_write_failure_leaves_cached_status_alone() {
    let driver = PumpDriver::new(BrokenLink, DeviceAddress::default());

    let mut cached = PumpStatus::default();
    cached.apply(PumpReading {
        operational: OperationalStatus::Normal,
        errors: ErrorBitmask::from_bits(0),
    });
    let before = cached.clone();

    let result = driver.query_status().await;
    assert!(matches!(result, Err(PumpError::Io(_))));
    if let Ok(reading) = result {
        cached.apply(reading);
    }
    assert_eq!(cached, before);
}

#[tokio::test]
async fn test_corrupted_reply_is_rejected() {
    let (driver, device) = driver_pair();
    let sim = tokio::spawn(async move {
        let mut reader = BufReader::new(device);
        read_frame(&mut reader, 0x80).await.unwrap();
        let mut reply = build_frame(0x80, b"2050000005");
        let cc = reply.len() - 2;
        reply[cc] = if reply[cc] == b'f' { b'e' } else { b'f' };
        reader.get_mut().write_all(&reply).await.unwrap();
    });

    let result = driver.read_raw(Window::OPERATING_STATUS).await;
    assert!(matches!(result, Err(PumpError::ChecksumMismatch { .. })));
    sim.await.unwrap();
}

#[tokio::test]
async fn test_read_numeric_rejects_garbage() {
    let (driver, device) = driver_pair();
    let sim = spawn_device(device, vec![(203, b"203012x4".to_vec())]);

    let window = Window::new(203).unwrap();
    let result = driver.read_numeric(window).await;
    assert!(matches!(result, Err(PumpError::NotANumber { window: 203, .. })));
    sim.await.unwrap();
}

#[tokio::test]
async fn test_read_bool_and_write_string() {
    let (driver, device) = driver_pair();
    let sim = spawn_device(device, vec![(122, b"12201".to_vec()), (120, vec![ACK])]);

    assert!(driver.read_bool(Window::new(122).unwrap()).await.unwrap());
    driver.write_string(Window::new(120).unwrap(), "TV 301").await.unwrap();

    let seen = sim.await.unwrap();
    assert_eq!(seen[1].data, b"____TV_301");
}

#[tokio::test]
async fn test_oversized_string_is_not_sent() {
    let (driver, mut device) = driver_pair();

    let result = driver.write_string(Window::new(120).unwrap(), "ELEVEN CHAR").await;
    assert!(matches!(result, Err(PumpError::PayloadTooLong { len: 11, max: 10 })));

    driver.teardown().await;
    let mut received = Vec::new();
    device.read_to_end(&mut received).await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_teardown_twice() {
    let (driver, _device) = driver_pair();

    driver.teardown().await;
    driver.teardown().await;

    let result = driver.query_status().await;
    assert!(matches!(result, Err(PumpError::Disconnected)));
}

#[tokio::test(start_paused = true)]
async fn test_reservation_blocks_other_callers() {
    let (driver, _device) = driver_pair();

    let reservation = driver.reserve().await.unwrap();
    assert!(reservation.is_open());

    let result = driver.query_status().await;
    assert!(matches!(result, Err(PumpError::GateTimeout(d)) if d == GATE_TIMEOUT));

    reservation.close().await;
    assert!(matches!(driver.start_pump().await, Err(PumpError::Disconnected)));
}

#[tokio::test]
async fn test_concurrent_callers_do_not_interleave() {
    let (driver, device) = driver_pair();
    let driver = Arc::new(driver);
    let sim = spawn_device(
        device,
        vec![
            (206, b"0".to_vec()),
            (205, b"5".to_vec()),
            (206, b"0".to_vec()),
            (205, b"5".to_vec()),
        ],
    );

    let a = tokio::spawn({
        let driver = Arc::clone(&driver);
        async move { driver.query_status().await }
    });
    let b = tokio::spawn({
        let driver = Arc::clone(&driver);
        async move { driver.query_status().await }
    });

    assert_eq!(a.await.unwrap().unwrap().operational, OperationalStatus::Normal);
    assert_eq!(b.await.unwrap().unwrap().operational, OperationalStatus::Normal);
    assert_eq!(sim.await.unwrap().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_silent_controller_hits_read_timeout() {
    let (host, _device) = tokio::io::duplex(256);
    let driver = PumpDriver::new(host, DeviceAddress::default()).with_read_timeout(Duration::from_secs(5));

    let result = driver.read_raw(Window::ERROR_CODE).await;
    assert!(matches!(result, Err(PumpError::ReadTimeout(_))));
}

#[tokio::test]
async fn test_foreign_address_reply_is_still_used() {
    let (driver, device) = driver_pair();
    let sim = tokio::spawn(async move {
        let mut reader = BufReader::new(device);
        read_frame(&mut reader, 0x80).await.unwrap();
        reader.get_mut().write_all(&build_frame(0x81, b"2050000004")).await.unwrap();
    });

    let response: Response = driver.read_raw(Window::OPERATING_STATUS).await.unwrap();
    assert_eq!(response.address, 0x81);
    assert_eq!(
        decode_operational_status(response.value(Window::OPERATING_STATUS).unwrap()).unwrap(),
        OperationalStatus::Braking
    );
    sim.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_is_never_taken_for_the_next_one() {
    let (host, device) = tokio::io::duplex(256);
    let driver = PumpDriver::new(host, DeviceAddress::default()).with_read_timeout(Duration::from_secs(2));
    let sim = tokio::spawn(async move {
        let mut reader = BufReader::new(device);
        read_frame(&mut reader, 0x80).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        // the driver may already have dropped its end
        let _ = reader.get_mut().write_all(&build_frame(0x80, b"2060000128")).await;
    });

    let first = driver.read_raw(Window::ERROR_CODE).await;
    assert!(matches!(first, Err(PumpError::ReadTimeout(_))));

    let second = driver.query_status().await;
    assert!(matches!(second, Err(PumpError::Disconnected)), "unexpected {second:?}");
    sim.await.unwrap();
}

#[tokio::test]
async fn test_transport_failure_takes_link_out_of_service() {
    let driver = PumpDriver::new(BrokenLink, DeviceAddress::default());

    assert!(matches!(driver.start_pump().await, Err(PumpError::Io(_))));
    assert!(matches!(driver.stop_pump().await, Err(PumpError::Disconnected)));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_read_takes_link_out_of_service() {
    let (driver, _device) = driver_pair();

    let cancelled = tokio::time::timeout(Duration::from_secs(1), driver.read_raw(Window::ERROR_CODE)).await;
    assert!(cancelled.is_err());

    let result = driver.read_raw(Window::ERROR_CODE).await;
    assert!(matches!(result, Err(PumpError::Disconnected)));
}

#[tokio::test]
async fn test_reply_for_another_window_is_rejected() {
    let (driver, device) = driver_pair();
    let sim = spawn_device(
        device,
        vec![(206, b"2050000005".to_vec()), (205, b"2050000005".to_vec())],
    );

    let result = driver.query_status().await;
    assert!(matches!(result, Err(PumpError::MalformedFrame(_))), "unexpected {result:?}");

    // content errors keep the link in step
    let reading = driver.read_numeric(Window::OPERATING_STATUS).await.unwrap();
    assert_eq!(reading, 5.0);
    sim.await.unwrap();
}
