/*!
 * Framed TCP transport.
 *
 * Carries one encrypted message per frame: a big-endian u32 length prefix
 * followed by the cipher output. Reconnects lazily on the next `send`
 * after a connection loss.
 */
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{DeviceError, Result};
use crate::recipe::TransportKind;
use crate::transport::{Cipher, Transport};

use async_trait::async_trait;

/// Default port for the XOR scheme
pub const DEFAULT_PORT: u16 = 9999;

/// Upper bound on a single reply frame, to keep a misbehaving device from
/// exhausting memory
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// TCP transport with length-prefixed frames and a pluggable cipher
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    cipher: Box<dyn Cipher>,
    kind: TransportKind,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Create a new transport for the given host and port
    pub fn new<S: Into<String>>(
        host: S,
        port: u16,
        timeout: Duration,
        cipher: Box<dyn Cipher>,
        kind: TransportKind,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            cipher,
            kind,
            stream: None,
        }
    }

    async fn stream(&mut self) -> Result<&mut TcpStream> {
        if self.stream.is_none() {
            let addr = format!("{}:{}", self.host, self.port);
            debug!("Connecting to {}", addr);
            let stream = timeout(self.timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| DeviceError::timeout(format!("Connect to {} timed out", addr)))?
                .map_err(|e| DeviceError::connection(format!("Connect to {} failed: {}", addr, e)))?;
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| DeviceError::connection("Transport not connected"))
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(payload);

        let stream = self.stream().await?;
        stream
            .write_all(&frame)
            .await
            .map_err(|e| DeviceError::connection(format!("Write failed: {}", e)))?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let stream = self.stream().await?;

        let mut header = [0u8; 4];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| DeviceError::connection(format!("Read failed: {}", e)))?;
        let len = BytesMut::from(&header[..]).get_u32() as usize;
        if len > MAX_FRAME_LEN {
            return Err(DeviceError::connection(format!(
                "Reply frame of {} bytes exceeds limit",
                len
            )));
        }

        let mut payload = vec![0u8; len];
        stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| DeviceError::connection(format!("Read failed: {}", e)))?;
        Ok(payload)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self) -> Result<()> {
        self.stream().await?;
        Ok(())
    }

    async fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let wire = self.cipher.encrypt(request);
        trace!("Sending {} byte frame to {}", wire.len(), self.host);

        let deadline = self.timeout;
        let result = async {
            self.write_frame(&wire).await?;
            self.read_frame().await
        };
        let reply = match timeout(deadline, result).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                // Connection state is unknown after a failed exchange
                self.stream = None;
                return Err(e);
            }
            Err(_) => {
                self.stream = None;
                return Err(DeviceError::timeout(format!(
                    "Query to {} timed out",
                    self.host
                )));
            }
        };

        Ok(self.cipher.decrypt(&reply))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing connection to {}", self.host);
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}
