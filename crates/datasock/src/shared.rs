//! State shared between the facade and the connection manager.
//!
//! Two locks, never nested in the other order:
//! - `state` (std mutex) guards the dispatcher, the error bridge, the
//!   open flag and the session counter. It is never held across an `.await`.
//! - `writer` (async mutex) serializes writes on the socket's write half.
//!   It is taken first when both are needed.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Instant;

use tokio::io::WriteHalf;
use tokio::sync::watch;

use crate::bridge::ErrorBridge;
use crate::config::SocketConfig;
use crate::dispatch::Dispatcher;
use crate::log::Log;
use crate::transport;
use crate::transport::BoxStream;
use crate::transport::Connector;
use crate::transport::TransportError;

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection manager is running.
    Closed,
    /// Connecting, reconnecting, or recovering from a reset.
    Connecting,
    /// Handshake done; frames flow.
    Connected,
}

pub(crate) type Writer = WriteHalf<BoxStream>;

pub(crate) struct State {
    pub dispatcher: Dispatcher,
    pub bridge: ErrorBridge,
    /// Set by `open`, cleared by `close` or by the manager giving up on an idle link.
    pub open_desired: bool,
    /// Bumped by every `open`; a manager only acts while its session is current.
    pub session: u64,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    link: watch::Sender<LinkState>,
    reset: watch::Sender<u64>,
    writer: tokio::sync::Mutex<Option<(u64, Writer)>>,
    pub config: SocketConfig,
    pub log: Arc<dyn Log>,
    pub connector: Arc<dyn Connector>,
}

impl Shared {
    pub fn new(connector: Arc<dyn Connector>, config: SocketConfig, log: Arc<dyn Log>) -> Self {
        let (link, _) = watch::channel(LinkState::Closed);
        let (reset, _) = watch::channel(0);
        let state = State {
            dispatcher: Dispatcher::new(config.mode, config.idle_timeout),
            bridge: ErrorBridge::new(),
            open_desired: false,
            session: 0,
        };

        Self {
            state: Mutex::new(state),
            link,
            reset,
            writer: tokio::sync::Mutex::new(None),
            config,
            log,
            connector,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn link_state(&self) -> LinkState {
        *self.link.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    pub fn set_link(&self, link: LinkState) {
        self.link.send_replace(link);
    }

    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    pub fn subscribe_reset(&self) -> watch::Receiver<u64> {
        self.reset.subscribe()
    }

    pub fn reset_epoch(&self) -> u64 {
        *self.reset.borrow()
    }

    /// Tears the current connection down from a foreground caller.
    ///
    /// The link drops first so every woken wait observes the loss; the
    /// manager then sees the new epoch and abandons the socket.
    pub fn request_reset(&self, state: &mut State) {
        let link = if state.open_desired { LinkState::Connecting } else { LinkState::Closed };
        self.set_link(link);
        let woken = state.dispatcher.reset_all();
        self.reset.send_modify(|epoch| *epoch += 1);
        self.log.debug(&format!("reset requested, {} waits released", woken));
    }

    /// Installs the write half of a fresh connection, unless `session` is stale.
    pub async fn install_writer(&self, session: u64, writer: Writer) -> bool {
        let mut slot = self.writer.lock().await;
        if self.lock().session != session {
            return false;
        }
        *slot = Some((session, writer));
        true
    }

    /// Drops the write half owned by `session`, if it is still installed.
    pub async fn clear_writer(&self, session: u64) {
        let mut slot = self.writer.lock().await;
        if matches!(slot.as_ref(), Some((owner, _)) if *owner == session) {
            *slot = None;
        }
    }

    /// Writes `bytes` as one uninterrupted unit.
    ///
    /// # Errors
    /// `ConnectionDropped` if no connection is installed; otherwise the write failure.
    pub async fn write_raw(&self, bytes: &[u8]) -> transport::Result<()> {
        let mut slot = self.writer.lock().await;
        let Some((_, writer)) = slot.as_mut() else {
            return Err(TransportError::ConnectionDropped);
        };
        transport::send_exact(writer, bytes).await
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }
}
