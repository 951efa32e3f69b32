//! TcpTransport - plain TCP byte stream using tokio.
//!
//! The read and write halves sit behind separate locks so a pending
//! `recv()` never blocks a `send()`.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Size of each read from the socket.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Configuration for TcpTransport.
#[derive(Clone, Debug)]
pub struct TcpTransportConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
        }
    }
}

/// TcpTransport implements the Transport trait over a tokio `TcpStream`.
///
/// # Example
///
/// ```ignore
/// let transport = TcpTransport::new();
/// transport.connect("127.0.0.1:9000").await?;
/// transport.send(b"hello").await?;
/// let chunk = transport.recv().await?;
/// ```
#[derive(Debug, Default)]
pub struct TcpTransport {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    config: TcpTransportConfig,
}

impl TcpTransport {
    /// Create a new TcpTransport with default configuration.
    pub fn new() -> Self {
        Self::with_config(TcpTransportConfig::default())
    }

    /// Create a new TcpTransport with custom configuration.
    pub fn with_config(config: TcpTransportConfig) -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            config,
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &str) -> Result<(), TransportError> {
        // Close existing connection if any
        self.close().await.ok();

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(format!("{endpoint}: {e}")))?;

        if self.config.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|e| TransportError::ConnectionFailed(format!("set_nodelay: {e}")))?;
        }

        let (read, write) = stream.into_split();
        *self.reader.lock().await = Some(read);
        *self.writer.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;

        if let Err(e) = writer.write_all(data).await {
            self.mark_disconnected();
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;

        // read() is cancel-safe: nothing is consumed unless it completes
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        match reader.read(&mut buf).await {
            Ok(0) => {
                self.mark_disconnected();
                Err(TransportError::ConnectionClosed)
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => {
                self.mark_disconnected();
                Err(TransportError::ReceiveFailed(e.to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_disconnected();
        if let Some(mut writer) = self.writer.lock().await.take() {
            // Best effort FIN; the peer may already be gone
            writer.shutdown().await.ok();
        }
        self.reader.lock().await.take();
        Ok(())
    }
}
