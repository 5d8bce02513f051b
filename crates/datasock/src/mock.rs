//! In-memory driver stand-ins for testing.
//!
//! `DuplexConnector` hands out `tokio::io::duplex` pipes; the far end of each
//! pipe arrives as a [`MockPeer`] on a channel, one per connection attempt.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tagframe::Decoder;
use tagframe::Frame;
use tagframe::tags;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::transport::BoxStream;
use crate::transport::Connector;

const PIPE_CAPACITY: usize = 64 * 1024;
const READ_CHUNK: usize = 8 * 1024;

/// A connector whose every connection is a fresh in-memory pipe.
pub struct DuplexConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    attempts: AtomicUsize,
    refusing: AtomicBool,
}

impl DuplexConnector {
    /// Returns the connector and the stream of driver-side ends.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self { peers, attempts: AtomicUsize::new(0), refusing: AtomicBool::new(false) };
        (connector, rx)
    }

    /// Connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Makes further attempts fail with `ConnectionRefused`.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Connector for DuplexConnector {
    fn describe(&self) -> String {
        "duplex".to_string()
    }

    async fn connect(&self) -> io::Result<BoxStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused by mock"));
        }

        let (client, driver) = tokio::io::duplex(PIPE_CAPACITY);
        self.peers
            .send(MockPeer { stream: driver, buf: Vec::new() })
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no mock driver listening"))?;
        Ok(Box::new(client))
    }
}

/// What the client wrote, as the driver reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A bare tag: keepalive or close.
    Signal(i32),
    Frame(Frame),
}

/// The driver side of one connection.
pub struct MockPeer {
    stream: DuplexStream,
    /// Bytes read from the pipe but not yet decoded.
    buf: Vec<u8>,
}

impl MockPeer {
    pub async fn read_inbound(&mut self) -> io::Result<Inbound> {
        loop {
            let (decoded, consumed) = {
                let mut dec = Decoder::new(&self.buf);
                let decoded = match dec.peek_tag() {
                    Ok(tag) if tag == tags::KEEPALIVE || tag == tags::CLOSE => dec.tag().map(Inbound::Signal),
                    Ok(_) => dec.frame().map(|frame| Inbound::Frame(frame.to_owned())),
                    Err(e) => Err(e),
                };
                (decoded, self.buf.len() - dec.remaining())
            };
            match decoded {
                Ok(inbound) => {
                    self.buf.drain(..consumed);
                    return Ok(inbound);
                }
                Err(tagframe::Error::UnexpectedEnd { .. }) => self.fill().await?,
                Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
            }
        }
    }

    /// Reads whatever the pipe has next into the decode buffer.
    async fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client closed the pipe"));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Next frame, skipping keepalives.
    ///
    /// # Errors
    /// `ConnectionAborted` if the client sent the close signal.
    pub async fn read_frame(&mut self) -> io::Result<Frame> {
        loop {
            match self.read_inbound().await? {
                Inbound::Frame(frame) => return Ok(frame),
                Inbound::Signal(tags::CLOSE) => {
                    return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "client sent close"));
                }
                Inbound::Signal(_) => continue,
            }
        }
    }

    /// Reads one bare keepalive. The client sends one before every frame it
    /// waits for, so this syncs the driver with the client's receive loop.
    pub async fn expect_keepalive(&mut self) -> io::Result<()> {
        match self.read_inbound().await? {
            Inbound::Signal(tags::KEEPALIVE) => Ok(()),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected keepalive, got {:?}", other),
            )),
        }
    }

    /// Like `read_frame`, but gives up after `timeout`.
    pub async fn try_read_frame(&mut self, timeout: Duration) -> io::Result<Option<Frame>> {
        match tokio::time::timeout(timeout, self.read_frame()).await {
            Ok(frame) => frame.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Reads the idle-timeout announcement every connection starts with.
    /// Returns the announced seconds.
    pub async fn accept_handshake(&mut self) -> io::Result<i32> {
        let frame = self.read_frame().await?;
        if frame.tag != tags::CMD_TIMEOUT_SOCKET {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected idle-timeout announcement, got tag {}", frame.tag),
            ));
        }
        frame.int().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    pub async fn send_frame(&mut self, tag: i32, payload: &[u8]) -> io::Result<()> {
        let bytes = tagframe::encode_frame(tag, payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        self.send_raw(&bytes).await
    }

    pub async fn send_signal(&mut self, tag: i32) -> io::Result<()> {
        self.send_raw(&tagframe::encode_signal(tag)).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }
}
