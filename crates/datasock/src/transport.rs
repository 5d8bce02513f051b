//! # Transport I/O
//!
//! Exact-size reads and writes over a raw byte stream, and the `Connector`
//! abstraction that opens those streams.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: Nothing here knows about tags or frames. It moves
//!   exactly `n` bytes or fails with a classified error.
//! - **Bounded**: A peer trickling one byte at a time cannot keep a read alive
//!   forever; partial reads are capped.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Errors that occur at the network/transport layer.
///
/// Every variant forces a disconnect followed by an automatic reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A read returned no data: the peer closed the connection.
    PeerClosed { received: usize, expected: usize },
    /// The peer delivered the bytes in more fragments than allowed.
    TooManyFragments { received: usize, expected: usize, attempts: usize },
    /// Underlying socket failure.
    Io { kind: io::ErrorKind, message: String },
    /// The driver sent tag 0 in place of a frame.
    DriverError,
    /// The payload ended before its declared length.
    Framing { declared: u32, received: usize },
    /// The declared payload length is above the configured limit.
    PayloadTooLarge { declared: u32, limit: usize },
    /// The connection dropped while a caller was waiting on it.
    ConnectionDropped,
    /// A failure the receive loop could not classify.
    Unexpected(String),
}

impl TransportError {
    /// True for an orderly close: a read returned nothing at a frame boundary.
    ///
    /// Resets and broken pipes are I/O failures, not closes.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, Self::PeerClosed { received: 0, .. })
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed { received, expected } => {
                write!(f, "Connection closed by peer ({}/{} bytes received)", received, expected)
            }
            Self::TooManyFragments { received, expected, attempts } => write!(
                f,
                "Received in more than {} parts ({}/{} bytes received)",
                attempts, received, expected
            ),
            Self::Io { kind, message } => write!(f, "I/O error ({:?}): {}", kind, message),
            Self::DriverError => write!(f, "Driver error while reading the socket"),
            Self::Framing { declared, received } => {
                write!(f, "Wrong frame size ({}/{} bytes)", received, declared)
            }
            Self::PayloadTooLarge { declared, limit } => {
                write!(f, "Declared payload of {} bytes exceeds limit of {}", declared, limit)
            }
            Self::ConnectionDropped => write!(f, "Connection dropped"),
            Self::Unexpected(msg) => write!(f, "Unexpected failure: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io { kind: e.kind(), message: e.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A bidirectional byte stream the connection manager can own.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxStream = Box<dyn Stream>;

/// Opens a fresh stream to the driver.
///
/// This trait is designed to be object-safe (`Arc<dyn Connector>`), so tests
/// can substitute an in-memory peer for the TCP socket.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Human readable destination, used in log lines.
    fn describe(&self) -> String;

    /// Attempts a single connection. Retrying is the caller's business.
    async fn connect(&self) -> io::Result<BoxStream>;
}

/// Connects to the driver over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    fn describe(&self) -> String {
        self.addr.clone()
    }

    async fn connect(&self) -> io::Result<BoxStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Writes all of `data`, resuming after short writes.
pub async fn send_exact<W>(stream: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut sent = 0;
    while sent < data.len() {
        let n = stream.write(&data[sent..]).await?;
        if n == 0 {
            return Err(TransportError::from(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("no data sent ({}/{} bytes)", sent, data.len()),
            )));
        }
        sent += n;
    }
    stream.flush().await?;
    Ok(())
}

/// Reads exactly `size` bytes.
///
/// # Errors
/// - `PeerClosed` if a read returns no data.
/// - `TooManyFragments` if `max_fragments` reads did not complete the buffer.
pub async fn receive_exact<R>(stream: &mut R, size: usize, max_fragments: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; size];
    let mut received = 0;
    let mut attempts = 0;

    while received < size {
        if attempts >= max_fragments {
            return Err(TransportError::TooManyFragments { received, expected: size, attempts });
        }
        let n = stream.read(&mut buf[received..]).await?;
        if n == 0 {
            return Err(TransportError::PeerClosed { received, expected: size });
        }
        received += n;
        attempts += 1;
    }

    Ok(buf)
}

/// Reads one native-endian 4-byte integer (a tag or a length).
pub async fn receive_word<R>(stream: &mut R, max_fragments: usize) -> Result<[u8; 4]>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let bytes = receive_exact(stream, 4, max_fragments).await?;
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes);
    Ok(word)
}

/// Connects with an upper bound on the time spent in the attempt.
pub async fn connect_with_timeout(connector: &dyn Connector, timeout: Duration) -> io::Result<BoxStream> {
    match tokio::time::timeout(timeout, connector.connect()).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out")),
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::Context;
    use std::task::Poll;

    use tokio::io::ReadBuf;

    use super::*;

    /// Yields its data one byte per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            if self.pos < self.data.len() && buf.remaining() > 0 {
                let byte = self.data[self.pos];
                buf.put_slice(&[byte]);
                self.pos += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_receive_exact_across_fragments() {
        let mut reader = Trickle { data: (0..100u8).collect(), pos: 0 };
        let data = receive_exact(&mut reader, 100, 100).await.unwrap();
        assert_eq!(data, (0..100u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_receive_exact_too_many_fragments() {
        let mut reader = Trickle { data: vec![7u8; 101], pos: 0 };
        match receive_exact(&mut reader, 101, 100).await {
            Err(TransportError::TooManyFragments { received, expected, attempts }) => {
                assert_eq!(received, 100);
                assert_eq!(expected, 101);
                assert_eq!(attempts, 100);
            }
            other => panic!("Expected TooManyFragments, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_exact_zero_read_is_peer_closed() {
        let mut reader = Trickle { data: vec![1, 2], pos: 0 };
        let err = receive_exact(&mut reader, 4, 100).await.unwrap_err();
        assert_eq!(err, TransportError::PeerClosed { received: 2, expected: 4 });
        assert!(!err.is_peer_closed());

        let mut empty = Trickle { data: Vec::new(), pos: 0 };
        let err = receive_exact(&mut empty, 4, 100).await.unwrap_err();
        assert!(err.is_peer_closed());
    }

    #[tokio::test]
    async fn test_send_exact_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(16);
        let payload: Vec<u8> = (0..200u8).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move { send_exact(&mut a, &payload).await });
        let received = receive_exact(&mut b, 200, 1000).await.unwrap();

        writer.await.unwrap().unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_send_exact_to_dropped_peer_fails() {
        let (mut a, b) = tokio::io::duplex(16);
        drop(b);
        let err = send_exact(&mut a, b"abc").await.unwrap_err();
        match &err {
            TransportError::Io { kind, .. } => assert_eq!(*kind, io::ErrorKind::BrokenPipe),
            other => panic!("Expected Io, got {:?}", other),
        }
        assert!(!err.is_peer_closed());
    }

    #[test]
    fn test_only_a_clean_zero_read_is_a_peer_close() {
        assert!(TransportError::PeerClosed { received: 0, expected: 4 }.is_peer_closed());
        assert!(!TransportError::PeerClosed { received: 1, expected: 4 }.is_peer_closed());
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ] {
            let err = TransportError::from(io::Error::new(kind, "gone"));
            assert!(!err.is_peer_closed(), "{:?} must be bridged", kind);
        }
    }

    #[tokio::test]
    async fn test_receive_word() {
        let mut reader = Trickle { data: 20_007i32.to_ne_bytes().to_vec(), pos: 0 };
        let word = receive_word(&mut reader, 100).await.unwrap();
        assert_eq!(tagframe::decode_tag(word), 20_007);
    }
}
