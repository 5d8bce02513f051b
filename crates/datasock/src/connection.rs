//! # Connection manager
//!
//! A background task owning the socket to the driver. It connects (and
//! reconnects) for as long as the socket is open, runs the receive loop, and
//! hands every failure to the foreground through the error bridge.
//!
//! ## Invariants
//! - **Single Owner**: the manager alone reads from the socket. Foreground
//!   callers only write, through the shared write half.
//! - **Nothing Silent**: a connection's end, panics included, either lands in
//!   the error bridge or is recognised as the driver dropping an idle client,
//!   and every waiter is woken either way.
//! - **Stale Sessions Stand Down**: a manager whose session was superseded by a
//!   later `open` touches neither the link state nor the dispatcher.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tagframe::Frame;
use tagframe::tags;
use tagframe::tags::TagClass;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::sync::watch;

use crate::dispatch::Delivery;
use crate::shared::LinkState;
use crate::shared::Shared;
use crate::transport;
use crate::transport::BoxStream;
use crate::transport::TransportError;

/// Reconnection delays: doubling from `initial`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max, current: initial }
    }

    /// Returns the delay to sleep now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Why a connection ended.
#[derive(Debug)]
enum Exit {
    /// A foreground caller asked for the reset (close, failed send).
    Requested,
    /// The connection failed under the manager.
    Failed(TransportError),
}

pub(crate) struct ConnectionManager {
    shared: Arc<Shared>,
    session: u64,
}

impl ConnectionManager {
    pub fn new(shared: Arc<Shared>, session: u64) -> Self {
        Self { shared, session }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let config = &self.shared.config;
        let log = self.shared.log.clone();
        let destination = self.shared.connector.describe();
        let mut backoff = Backoff::new(config.reconnect_initial, config.reconnect_max);
        let mut last_failure: Option<io::ErrorKind> = None;
        let mut reset_rx = self.shared.subscribe_reset();

        log.debug(&format!("connection manager started (session {})", self.session));

        while self.is_wanted() {
            let epoch = *reset_rx.borrow_and_update();

            let stream = match transport::connect_with_timeout(
                self.shared.connector.as_ref(),
                config.connect_timeout,
            )
            .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    if last_failure != Some(e.kind()) {
                        log.info(&format!(
                            "connection to {} failed ({}), retrying indefinitely",
                            destination, e
                        ));
                        last_failure = Some(e.kind());
                    }
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = reset_requested(&mut reset_rx, epoch) => {}
                    }
                    continue;
                }
            };

            log.info(&format!("connected to {}", destination));
            last_failure = None;
            backoff.reset();

            let (mut reader, writer) = tokio::io::split(stream);
            let serving = self.serve(writer, &mut reader, &mut reset_rx, epoch);
            let exit = match AssertUnwindSafe(serving).catch_unwind().await {
                Ok(exit) => exit,
                Err(panic) => {
                    let message = panic_message(panic);
                    log.fatal(&format!("connection task panicked: {}", message));
                    Exit::Failed(TransportError::Unexpected(message))
                }
            };
            drop(reader);

            self.recover(exit).await;
        }

        let state = self.shared.lock();
        if state.session == self.session {
            self.shared.set_link(LinkState::Closed);
            log.info("data socket has been closed");
        }
    }

    fn is_wanted(&self) -> bool {
        let state = self.shared.lock();
        state.open_desired && state.session == self.session
    }

    /// Runs one connection from handshake to exit. Panics inside are caught
    /// by the caller and end up in the bridge like any other failure.
    async fn serve(
        &self,
        writer: WriteHalf<BoxStream>,
        reader: &mut ReadHalf<BoxStream>,
        reset_rx: &mut watch::Receiver<u64>,
        epoch: u64,
    ) -> Exit {
        if let Err(exit) = self.handshake(writer, epoch).await {
            return exit;
        }
        self.receive_until_reset(reader, reset_rx, epoch).await
    }

    /// Installs the write half, announces the idle timeout, and marks the
    /// link connected unless a reset arrived meanwhile.
    async fn handshake(&self, writer: WriteHalf<BoxStream>, epoch: u64) -> Result<(), Exit> {
        let idle_timeout = self.shared.lock().dispatcher.idle_timeout();
        let secs = self.shared.config.announced_idle_secs(idle_timeout);
        let frame = tagframe::encode_frame(tags::CMD_TIMEOUT_SOCKET, &tagframe::int_payload(secs))
            .map_err(|e| Exit::Failed(TransportError::Unexpected(e.to_string())))?;

        if !self.shared.install_writer(self.session, writer).await {
            return Err(Exit::Requested);
        }
        self.shared.write_raw(&frame).await.map_err(Exit::Failed)?;
        self.shared.log.debug(&format!("announced idle timeout of {}s", secs));

        let state = self.shared.lock();
        if !state.open_desired || state.session != self.session || self.shared.reset_epoch() != epoch {
            return Err(Exit::Requested);
        }
        self.shared.set_link(LinkState::Connected);
        Ok(())
    }

    async fn receive_until_reset(
        &self,
        reader: &mut ReadHalf<BoxStream>,
        reset_rx: &mut watch::Receiver<u64>,
        epoch: u64,
    ) -> Exit {
        loop {
            tokio::select! {
                biased;
                _ = reset_requested(reset_rx, epoch) => return Exit::Requested,
                received = self.receive_frame(reader) => match received {
                    Ok(frame) => self.publish(frame),
                    Err(e) => return Exit::Failed(e),
                },
            }
        }
    }

    /// One receive cycle: keepalive out, then the next application frame in.
    async fn receive_frame(&self, reader: &mut ReadHalf<BoxStream>) -> transport::Result<Frame> {
        let max_fragments = self.shared.config.max_fragments;

        self.shared.write_raw(&tagframe::encode_signal(tags::KEEPALIVE)).await?;

        let tag = loop {
            let tag = tagframe::decode_tag(transport::receive_word(reader, max_fragments).await?);
            match tags::classify(tag) {
                TagClass::Close => return Err(TransportError::DriverError),
                TagClass::Noise => continue,
                TagClass::Frame => break tag,
            }
        };

        let declared = tagframe::decode_length(transport::receive_word(reader, max_fragments).await?);
        let limit = self.shared.config.max_payload;
        if declared as usize > limit {
            return Err(TransportError::PayloadTooLarge { declared, limit });
        }

        let payload = transport::receive_exact(reader, declared as usize, max_fragments)
            .await
            .map_err(|e| match e {
                TransportError::PeerClosed { received, .. } => TransportError::Framing { declared, received },
                other => other,
            })?;

        Ok(Frame::new(tag, payload))
    }

    fn publish(&self, frame: Frame) {
        let tag = frame.tag;
        let size = frame.len();
        let mut state = self.shared.lock();
        if state.dispatcher.has_buffered(tag) {
            self.shared.log.debug(&format!("tag {} already in receive buffer, it has to be cleared", tag));
        }
        match state.dispatcher.deliver(frame) {
            Delivery::Lost => self.shared.log.debug(&format!("tag {} dropped, nobody waits for it", tag)),
            _ => self.shared.log.debug(&format!("received tag {} ({} bytes)", tag, size)),
        }
    }

    /// Tears down after a connection ended and decides whether to go on.
    async fn recover(&self, exit: Exit) {
        self.shared.clear_writer(self.session).await;

        let log = &self.shared.log;
        let mut state = self.shared.lock();
        if state.session != self.session {
            return;
        }

        self.shared.set_link(if state.open_desired { LinkState::Connecting } else { LinkState::Closed });
        // Judged before the waits are swept: a caller still waiting keeps the link wanted.
        let active = state.dispatcher.is_active(self.shared.now());

        match exit {
            Exit::Requested => log.debug("connection reset on request"),
            Exit::Failed(e) if e.is_peer_closed() && !active => {
                log.info("socket closed by the driver, probably due to inactivity");
                state.bridge.clear();
                state.open_desired = false;
            }
            Exit::Failed(e) => {
                log.info(&format!("{}, resetting connection", e));
                state.bridge.publish(e);
            }
        }

        let woken = state.dispatcher.reset_all();
        if woken > 0 {
            log.debug(&format!("{} pending waits released", woken));
        }

        if state.open_desired && state.bridge.is_pending() && !active {
            log.info("closing the socket after an error on an inactive connection");
            state.open_desired = false;
        }
    }
}

/// Resolves once the reset epoch moves past `epoch`.
async fn reset_requested(rx: &mut watch::Receiver<u64>, epoch: u64) {
    loop {
        let current = *rx.borrow_and_update();
        if current != epoch {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
