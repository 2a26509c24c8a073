//! Text status monitor: connects to the serial bridge, polls and prints.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::status::PumpStatus;
use crate::varian::{DeviceAddress, PumpDriver, PumpLink, Window};

/// Polls a pump through a TCP serial bridge and prints its status.
pub struct StatusMonitor {
    config: AppConfig,
}

impl StatusMonitor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Open the bridge connection and wrap it in a driver.
    pub async fn connect(&self) -> Result<PumpDriver<TcpStream>> {
        let bridge = &self.config.bridge;
        let endpoint = bridge.endpoint();
        let address = DeviceAddress::new(self.config.pump.device_address)?;

        info!("Connecting to pump bridge at {endpoint} (timeout={:?})", bridge.connect_timeout());
        let stream = timeout(bridge.connect_timeout(), TcpStream::connect(&endpoint))
            .await
            .map_err(|_| {
                error!("Connection timeout to {endpoint}");
                AppError::ConnectTimeout(endpoint.clone())
            })?
            .map_err(|e| {
                error!("Failed to connect to {endpoint}: {e}");
                AppError::connection(format!("{endpoint}: {e}"))
            })?;
        stream.set_nodelay(true)?;

        info!("Connected to {endpoint}, device address {}", address.offset());
        Ok(PumpDriver::new(stream, address).with_read_timeout(bridge.read_timeout()))
    }

    /// Refresh `status` from the pump. On failure `status` is left untouched.
    pub async fn poll_once<S: PumpLink>(&self, driver: &PumpDriver<S>, status: &mut PumpStatus) -> Result<()> {
        let reading = driver.query_status().await?;

        let mut extras = [None, None];
        for (slot, window) in extras
            .iter_mut()
            .zip([self.config.pump.frequency_window, self.config.pump.power_window])
        {
            if let Some(number) = window {
                *slot = Some(driver.read_numeric(Window::new(number)?).await?);
            }
        }

        status.apply(reading);
        let [frequency_hz, power_w] = extras;
        status.frequency_hz = frequency_hz;
        status.power_w = power_w;
        Ok(())
    }

    /// Poll until `shutdown` flips to true (or its sender goes away).
    ///
    /// Any poll failure drops the connection and reconnects after the
    /// configured delay.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut status = PumpStatus::default();

        while !*shutdown.borrow() {
            let driver = match self.connect().await {
                Ok(driver) => driver,
                Err(e) => {
                    warn!("Bridge unavailable: {e}");
                    if wait_or_shutdown(&mut shutdown, self.config.monitor.reconnect_delay()).await {
                        break;
                    }
                    continue;
                }
            };

            if self.poll_connected(&driver, &mut status, &mut shutdown).await {
                match driver.reserve().await {
                    Ok(reservation) => reservation.close().await,
                    Err(e) => error!("Could not reserve pump link for shutdown: {e}"),
                }
                break;
            }

            driver.teardown().await;
            if wait_or_shutdown(&mut shutdown, self.config.monitor.reconnect_delay()).await {
                break;
            }
        }

        info!("Status monitor stopped");
        Ok(())
    }

    /// Poll on one connection. Returns true when asked to shut down.
    async fn poll_connected<S: PumpLink>(
        &self,
        driver: &PumpDriver<S>,
        status: &mut PumpStatus,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            let polled = tokio::select! {
                result = self.poll_once(driver, status) => result,
                _ = shutdown_requested(shutdown) => {
                    info!("Shutdown requested while waiting on the pump");
                    return true;
                }
            };
            match polled {
                Ok(()) => println!("{status}\n"),
                Err(e) => {
                    warn!("Status poll failed, reconnecting: {e}");
                    if let Some(age) = status.age_secs() {
                        warn!("Displayed status is {age}s old");
                    }
                    return false;
                }
            }
            if wait_or_shutdown(shutdown, self.config.monitor.poll_interval()).await {
                return true;
            }
        }
    }
}

/// Sleep for `delay`; true if shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_requested(shutdown) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Resolves once the flag is true or its sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varian::{OperationalStatus, Request, build_frame};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Read one request frame off a raw socket and return its body.
    async fn next_request(socket: &mut TcpStream) -> Option<Request> {
        let mut frame = Vec::new();
        loop {
            let byte = socket.read_u8().await.ok()?;
            frame.push(byte);
            if byte == 0x03 {
                break;
            }
        }
        let mut cc = [0u8; 2];
        socket.read_exact(&mut cc).await.ok()?;
        Request::parse(&frame[2..frame.len() - 1]).ok()
    }

    /// Fake bridge: answers every read with a value per window until hang-up.
    async fn serve(listener: TcpListener) -> usize {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut served = 0;
        while let Some(request) = next_request(&mut socket).await {
            let value: &[u8] = match request.window.number() {
                206 => b"000000",
                205 => b"000005",
                203 => b"000963",
                _ => b"?",
            };
            let mut body = request.window.to_string().into_bytes();
            body.push(b'0');
            body.extend_from_slice(value);
            socket.write_all(&build_frame(0x80, &body)).await.unwrap();
            served += 1;
        }
        served
    }

    fn config_for(listener: &TcpListener) -> AppConfig {
        let mut config = AppConfig::default();
        config.bridge.host = "127.0.0.1".to_string();
        config.bridge.port = listener.local_addr().unwrap().port();
        config.bridge.read_timeout_secs = 5;
        config.pump.frequency_window = Some(203);
        config
    }

    #[tokio::test]
    async fn test_poll_once_fills_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let monitor = StatusMonitor::new(config_for(&listener));
        let bridge = tokio::spawn(serve(listener));

        let driver = monitor.connect().await.unwrap();
        let mut status = PumpStatus::default();
        monitor.poll_once(&driver, &mut status).await.unwrap();

        assert_eq!(status.operational, OperationalStatus::Normal);
        assert!(status.errors.is_clear());
        assert_eq!(status.frequency_hz, Some(963.0));
        assert_eq!(status.power_w, None);
        assert!(status.last_update.is_some());

        driver.teardown().await;
        assert_eq!(bridge.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let monitor = StatusMonitor::new(config_for(&listener));
        let bridge = tokio::spawn(serve(listener));

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { monitor.run(rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        run.await.unwrap().unwrap();
        // one full poll before the shutdown, then the link is closed
        assert_eq!(bridge.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_for(&listener);
        config.bridge.read_timeout_secs = 30;
        let monitor = StatusMonitor::new(config);

        // accepts and swallows requests, never answers
        let bridge = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut sink = Vec::new();
            let _ = socket.read_to_end(&mut sink).await;
            sink.len()
        });

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { monitor.run(rx).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let stopped = timeout(Duration::from_secs(2), run).await;
        stopped.expect("monitor should stop promptly").unwrap().unwrap();
        // link closed, and only the first request ever went out
        assert_eq!(bridge.await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = config_for(&listener);
        drop(listener);

        let result = StatusMonitor::new(config).connect().await;
        let err = result.err().unwrap();
        assert!(err.is_link_failure());
    }
}
