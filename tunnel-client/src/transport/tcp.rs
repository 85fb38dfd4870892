//! Agent control frames over plain TCP.
//!
//! Each frame is one JSON document behind a 4-byte big-endian length.
//! Read and write halves are locked independently so a reader task can stay
//! parked in `recv()` while requests are sent.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Largest frame accepted in either direction (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// TCP transport settings.
#[derive(Clone, Debug)]
pub struct TcpTransportConfig {
    /// Limit for establishing the connection.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm; control frames are small and latency-bound.
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

fn check_size(size: usize) -> Result<(), TransportError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(TransportError::FrameTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

/// Write one length-prefixed frame.
async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    check_size(frame.len())?;
    let header = (frame.len() as u32).to_be_bytes();
    let write_failed = |e: io::Error| TransportError::WriteFailed(e.to_string());

    writer.write_all(&header).await.map_err(write_failed)?;
    writer.write_all(frame).await.map_err(write_failed)?;
    writer.flush().await.map_err(write_failed)
}

/// Read one length-prefixed frame. EOF before a header is a clean close.
async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut header).await {
        return Err(match e.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => {
                TransportError::ConnectionClosed
            }
            _ => TransportError::ReadFailed(format!("frame header: {e}")),
        });
    }

    let size = u32::from_be_bytes(header) as usize;
    check_size(size)?;

    let mut frame = vec![0u8; size];
    reader
        .read_exact(&mut frame)
        .await
        .map_err(|e| TransportError::ReadFailed(format!("frame body ({size} bytes): {e}")))?;
    Ok(frame)
}

/// Control-connection transport over TCP.
#[derive(Debug, Default)]
pub struct TcpTransport {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    config: TcpTransportConfig,
}

impl TcpTransport {
    /// Unconnected transport with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconnected transport with custom settings.
    pub fn with_config(config: TcpTransportConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        self.close().await.ok();

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::ConnectTimeout(address.to_string()))?
            .map_err(|e| TransportError::Unreachable(format!("{address}: {e}")))?;

        if self.config.nodelay {
            stream
                .set_nodelay(true)
                .map_err(|e| TransportError::Unreachable(format!("{address}: set_nodelay: {e}")))?;
        }

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);

        tracing::debug!(%address, "tcp control connection open");
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        check_size(data.len())?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::NotConnected)?;
        write_frame(writer, data).await
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(TransportError::NotConnected)?;
        read_frame(reader).await
    }

    fn is_connected(&self) -> bool {
        // A locked writer means a send is in flight on an open connection.
        self.writer
            .try_lock()
            .map(|writer| writer.is_some())
            .unwrap_or(true)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            // Half-close: the agent sees EOF and drops its side, which ends
            // a parked recv() with ConnectionClosed.
            writer.shutdown().await.ok();
        }
        // Leave the read half to a parked recv(); it ends on EOF.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        (listener, address)
    }

    // ===========================================
    // Framing
    // ===========================================

    #[tokio::test]
    async fn frame_layout_is_length_then_body() {
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"cmd":"link"}"#).await.unwrap();

        assert_eq!(&buf[..4], &[0, 0, 0, 14]);
        assert_eq!(&buf[4..], br#"{"cmd":"link"}"#);
        assert_eq!(read_frame(&mut buf.as_slice()).await.unwrap(), br#"{"cmd":"link"}"#);
    }

    #[tokio::test]
    async fn oversized_header_is_rejected() {
        let header = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        let result = read_frame(&mut header.as_slice()).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn eof_is_clean_close_but_truncated_body_is_not() {
        let empty: &[u8] = &[];
        assert!(matches!(
            read_frame(&mut &empty[..]).await,
            Err(TransportError::ConnectionClosed)
        ));

        let truncated: &[u8] = &[0, 0, 0, 8, b'{'];
        assert!(matches!(
            read_frame(&mut &truncated[..]).await,
            Err(TransportError::ReadFailed(_))
        ));
    }

    // ===========================================
    // Connection
    // ===========================================

    #[test]
    fn tcp_transport_implements_transport_trait() {
        fn assert_transport<T: Transport + 'static>() {}
        assert_transport::<TcpTransport>();
    }

    #[tokio::test]
    async fn io_requires_connection() {
        let transport = TcpTransport::new();
        assert!(!transport.is_connected());
        assert!(matches!(transport.send(b"x").await, Err(TransportError::NotConnected)));
        assert!(matches!(transport.recv().await, Err(TransportError::NotConnected)));
        assert!(transport.close().await.is_ok());
    }

    #[tokio::test]
    async fn oversized_send_fails_before_io() {
        let transport = TcpTransport::new();
        let frame = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            transport.send(&frame).await,
            Err(TransportError::FrameTooLarge { size, .. }) if size == MAX_MESSAGE_SIZE + 1
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let (listener, address) = listener().await;
        drop(listener);

        let result = TcpTransport::new().connect(&address).await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }

    #[tokio::test]
    async fn exchanges_frames_with_agent() {
        let (listener, address) = listener().await;
        let agent = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let command = read_frame(&mut stream).await.unwrap();
            write_frame(&mut stream, br#"{"type":"response","transId":2,"data":{}}"#)
                .await
                .unwrap();
            command
        });

        let transport = TcpTransport::new();
        transport.connect(&address).await.unwrap();
        assert!(transport.is_connected());

        transport
            .send(br#"{"cmd":"link","transId":2,"data":{}}"#)
            .await
            .unwrap();

        assert_eq!(
            transport.recv().await.unwrap(),
            br#"{"type":"response","transId":2,"data":{}}"#
        );
        assert_eq!(agent.await.unwrap(), br#"{"cmd":"link","transId":2,"data":{}}"#);
    }

    #[tokio::test]
    async fn agent_hang_up_is_connection_closed() {
        let (listener, address) = listener().await;
        let agent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let transport = TcpTransport::new();
        transport.connect(&address).await.unwrap();
        agent.await.unwrap();

        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
