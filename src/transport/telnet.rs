//! Telnet-style socket transport
//!
//! Connects to the RTT relay exposed by a debug-probe driver (the J-Link
//! RTT telnet server listens on port 19021 by default). The stream carries
//! raw RTT bytes in both directions; no telnet option negotiation is done.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Cadence, Transport};
use crate::config::TransportConfig;
use crate::error::{ConsoleError, Result};

/// Socket transport with independently locked read and write halves
pub struct TelnetTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    alive: AtomicBool,
    peer: String,
    read_buffer_size: usize,
}

impl TelnetTransport {
    /// Connect to the relay; `connect_timeout_ms` bounds a connect that never completes
    pub async fn connect(config: &TransportConfig) -> Result<Self> {
        let address = format!("{}:{}", config.host, config.port);
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        info!("Connecting to RTT relay at {}", address);

        let stream = Self::open_stream(&address, timeout).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY on {}: {}", address, e);
        }
        Ok(Self::from_stream(stream, address, config.read_buffer_size))
    }

    fn from_stream(stream: TcpStream, peer: String, read_buffer_size: usize) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            alive: AtomicBool::new(true),
            peer,
            read_buffer_size: read_buffer_size.max(1),
        }
    }

    /// One connection attempt; an unreachable relay is reported right away
    async fn open_stream(address: &str, timeout: Duration) -> Result<TcpStream> {
        match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ConsoleError::TransportUnavailable(format!(
                "Failed to connect to RTT relay at {}: {}",
                address, e
            ))),
            Err(_) => Err(ConsoleError::TransportUnavailable(format!(
                "Connection to RTT relay at {} timed out after {:?}",
                address, timeout
            ))),
        }
    }

    fn mark_lost(&self, reason: String) -> ConsoleError {
        if self.alive.swap(false, Ordering::SeqCst) {
            warn!("RTT relay {} lost: {}", self.peer, reason);
        }
        ConsoleError::TransportLost(reason)
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    fn describe(&self) -> String {
        format!("telnet relay {}", self.peer)
    }

    fn cadence(&self) -> Cadence {
        Cadence::EventDriven
    }

    fn supports_write(&self) -> bool {
        true
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn read_available(&self, timeout: Duration) -> Result<Vec<u8>> {
        if !self.is_alive() {
            return Err(ConsoleError::TransportLost(format!("{} is closed", self.peer)));
        }

        let mut reader = self.reader.lock().await;
        let mut buffer = vec![0u8; self.read_buffer_size];
        match tokio::time::timeout(timeout, reader.read(&mut buffer)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(self.mark_lost("connection closed by relay".to_string())),
            Ok(Ok(n)) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Ok(Err(e)) => Err(self.mark_lost(format!("read failed: {}", e))),
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| ConsoleError::WriteFailed(format!("{}: {}", self.peer, e)))?;
        writer
            .flush()
            .await
            .map_err(|e| ConsoleError::WriteFailed(format!("{}: {}", self.peer, e)))?;
        debug!("Wrote {} bytes to {}", bytes.len(), self.peer);
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config_for(port: u16) -> TransportConfig {
        TransportConfig {
            port,
            connect_timeout_ms: 300,
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_failure_is_unavailable() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TelnetTransport::connect(&config_for(port)).await;
        assert!(matches!(result, Err(ConsoleError::TransportUnavailable(_))));
    }

    #[tokio::test]
    async fn test_refused_connection_is_reported_without_retrying() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = TransportConfig {
            port,
            ..TransportConfig::default()
        };
        let started = std::time::Instant::now();
        let result = TelnetTransport::connect(&config).await;

        assert!(matches!(result, Err(ConsoleError::TransportUnavailable(_))));
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_read_write_and_hang_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let relay = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello\n").await.unwrap();
            let mut received = [0u8; 5];
            socket.read_exact(&mut received).await.unwrap();
            received
        });

        let transport = TelnetTransport::connect(&config_for(port)).await.unwrap();
        assert_eq!(transport.cadence(), Cadence::EventDriven);

        let mut data = Vec::new();
        while data.len() < 6 {
            data.extend(transport.read_available(Duration::from_secs(1)).await.unwrap());
        }
        assert_eq!(data, b"hello\n");

        assert_eq!(transport.write(b"ping\n").await.unwrap(), 5);
        assert_eq!(&relay.await.unwrap(), b"ping\n");

        // Relay task has finished and dropped its socket
        let mut result = transport.read_available(Duration::from_secs(1)).await;
        while matches!(&result, Ok(chunk) if chunk.is_empty()) {
            result = transport.read_available(Duration::from_secs(1)).await;
        }
        assert!(matches!(result, Err(ConsoleError::TransportLost(_))));
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn test_read_times_out_with_empty_chunk() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let relay = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(socket);
        });

        let transport = TelnetTransport::connect(&config_for(port)).await.unwrap();
        let chunk = transport.read_available(Duration::from_millis(20)).await.unwrap();
        assert!(chunk.is_empty());
        assert!(transport.is_alive());
        relay.await.unwrap();
    }
}
