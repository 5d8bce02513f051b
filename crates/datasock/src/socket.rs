//! # Data socket
//!
//! The client-facing handle: open and close the link to the driver, send
//! frames, and receive the ones addressed to you.
//!
//! ## Philosophy
//!
//! - **Reconnect, Don't Fail**: while open, the socket reconnects on its own.
//!   A caller sees the fault once, through the error bridge, and the next
//!   call works on the fresh connection.
//! - **Clone To Share**: `DataSocket` is a cheap handle; clones drive the same
//!   connection from as many tasks as needed.

use std::sync::Arc;
use std::time::Duration;

use tagframe::Frame;
use tagframe::tags;
use tokio::sync::watch;

use crate::config::SocketConfig;
use crate::connection::ConnectionManager;
use crate::dispatch::DeliveryMode;
use crate::error::Error;
use crate::error::Result;
use crate::log::Log;
use crate::log::TracingLog;
use crate::shared::LinkState;
use crate::shared::Shared;
use crate::shared::State;
use crate::transport::Connector;
use crate::transport::TcpConnector;
use crate::transport::TransportError;
use crate::wait::WaitHandle;

/// Fluent builder for a [`DataSocket`].
pub struct DataSocketBuilder {
    connector: Arc<dyn Connector>,
    config: SocketConfig,
    log: Option<Arc<dyn Log>>,
}

impl DataSocketBuilder {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector, config: SocketConfig::default(), log: None }
    }

    pub fn config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mode(mut self, mode: DeliveryMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Routes log lines to `log` instead of `tracing`.
    pub fn log(mut self, log: Arc<dyn Log>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> DataSocket {
        let log: Arc<dyn Log> = match self.log {
            Some(log) => log,
            None => Arc::new(TracingLog::new(self.connector.describe())),
        };
        DataSocket { shared: Arc::new(Shared::new(self.connector, self.config, log)) }
    }
}

/// A multiplexed, self-reconnecting connection to the driver.
#[derive(Clone)]
pub struct DataSocket {
    shared: Arc<Shared>,
}

impl DataSocket {
    /// Socket to a driver listening on TCP `addr`, default configuration.
    pub fn new(addr: impl Into<String>) -> Self {
        Self::builder(Arc::new(TcpConnector::new(addr))).build()
    }

    pub fn builder(connector: Arc<dyn Connector>) -> DataSocketBuilder {
        DataSocketBuilder::new(connector)
    }

    /// Starts the connection manager. Returns at once; see [`Self::wait_connected`].
    ///
    /// # Errors
    /// `AlreadyOpen`, or `AlreadyConnected` if the previous connection is
    /// still being torn down.
    pub fn open(&self) -> Result<()> {
        let session = {
            let mut state = self.shared.lock();
            if state.open_desired {
                return Err(Error::AlreadyOpen);
            }
            if self.shared.is_connected() {
                return Err(Error::AlreadyConnected);
            }
            state.open_desired = true;
            state.session += 1;
            let now = self.shared.now();
            state.dispatcher.touch(now);
            self.shared.set_link(LinkState::Connecting);
            state.session
        };

        self.shared.log.info(&format!("opening data socket to {}", self.shared.connector.describe()));
        ConnectionManager::new(self.shared.clone(), session).spawn();
        Ok(())
    }

    /// Stops reconnecting and drops the connection.
    ///
    /// Tells the driver first, best effort. Pending waits are released with
    /// `ConnectionDropped`; buffered frames stay readable.
    ///
    /// # Errors
    /// A transport error bridged before the close; the socket is closed anyway.
    pub async fn close(&self) -> Result<()> {
        let pending = self.shared.lock().bridge.claim();
        self.shared.log.info("closing data socket");

        if let Err(e) = self.shared.write_raw(&tagframe::encode_signal(tags::CLOSE)).await {
            self.shared.log.info(&format!("failed to send close command to the driver: {}", e));
        }

        let mut state = self.shared.lock();
        state.open_desired = false;
        self.shared.request_reset(&mut state);
        pending
    }

    /// Blocks until connected, opening the socket if needed.
    ///
    /// # Errors
    /// A transport error bridged while waiting.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut link = self.shared.subscribe_link();
        loop {
            if self.shared.is_connected() {
                return Ok(());
            }
            if !self.is_open() {
                match self.open() {
                    Ok(()) | Err(Error::AlreadyOpen) | Err(Error::AlreadyConnected) => {}
                    Err(e) => return Err(e),
                }
            }
            self.shared.lock().bridge.claim()?;
            let _ = tokio::time::timeout(self.shared.config.connected_poll, link.changed()).await;
        }
    }

    /// Changes the idle timeout locally and announces it to the driver.
    ///
    /// # Errors
    /// `NotConnected`, or whatever the request/answer exchange fails with.
    pub async fn set_idle_timeout(&self, idle_timeout: Duration) -> Result<()> {
        if !self.shared.is_connected() {
            return Err(Error::NotConnected);
        }
        self.shared.log.info(&format!("setting socket timeout to {:?}", idle_timeout));

        let answer = tags::answer_for(tags::CMD_TIMEOUT_SOCKET);
        {
            let mut state = self.shared.lock();
            state.dispatcher.set_idle_timeout(idle_timeout);
            // Answers to the connect-time announcement are not interesting.
            state.dispatcher.clear_buffer(Some(answer));
        }

        let secs = self.shared.config.announced_idle_secs(idle_timeout);
        self.send_and_receive(
            tags::CMD_TIMEOUT_SOCKET,
            &tagframe::int_payload(secs),
            answer,
            self.shared.config.idle_config_timeout,
        )
        .await?;
        Ok(())
    }

    /// Writes one frame.
    ///
    /// # Errors
    /// `NotConnected`, an encoding error, or the write failure (the
    /// connection is reset in that case).
    pub async fn send_frame(&self, tag: i32, payload: &[u8]) -> Result<()> {
        let bytes = tagframe::encode_frame(tag, payload)?;
        self.check_connected()?;
        self.shared.log.debug(&format!("sending tag {} ({} bytes)", tag, payload.len()));
        self.write_or_reset(&bytes).await
    }

    /// Waits for the next frame carrying `tag`, or takes one already buffered.
    ///
    /// # Errors
    /// `Timeout`, `DuplicateWait`, `NotConnected`, or a transport error.
    pub async fn receive_frame(&self, tag: i32, timeout: Duration) -> Result<Frame> {
        let handle = {
            let mut state = self.lock_connected()?;
            if let Ok(frame) = state.dispatcher.pop_frame(Some(tag)) {
                self.shared.log.debug(&format!("tag {} was already buffered", tag));
                return Ok(frame);
            }
            self.register_locked(&mut state, tag)?
        };

        handle.wait(timeout).await?;
        self.read_frame(Some(tag))
    }

    pub async fn receive_frame_default(&self, tag: i32) -> Result<Frame> {
        self.receive_frame(tag, self.shared.config.reply_timeout).await
    }

    /// Sends a request and waits for its answer.
    ///
    /// The wait is registered before the request leaves, so a fast answer is
    /// never missed.
    ///
    /// # Errors
    /// `StaleResponse` if an answer with `receive_tag` is still buffered (nothing
    /// is sent), plus everything `send_frame` and `receive_frame` fail with.
    pub async fn send_and_receive(
        &self,
        send_tag: i32,
        payload: &[u8],
        receive_tag: i32,
        timeout: Duration,
    ) -> Result<Frame> {
        let bytes = tagframe::encode_frame(send_tag, payload)?;

        let handle = {
            let mut state = self.lock_connected()?;
            if state.dispatcher.has_buffered(receive_tag) {
                self.shared.log.info(&format!(
                    "tag {} is already in the receive buffer, clear it before requesting it again",
                    receive_tag
                ));
                return Err(Error::StaleResponse { tag: receive_tag });
            }
            self.register_locked(&mut state, receive_tag)?
        };

        self.shared.log.debug(&format!("sending tag {}, expecting tag {}", send_tag, receive_tag));
        // On failure the handle drops and withdraws the registration.
        self.write_or_reset(&bytes).await?;

        handle.wait(timeout).await?;
        self.read_frame(Some(receive_tag))
    }

    pub async fn send_and_receive_default(&self, send_tag: i32, payload: &[u8], receive_tag: i32) -> Result<Frame> {
        self.send_and_receive(send_tag, payload, receive_tag, self.shared.config.reply_timeout)
            .await
    }

    /// Registers interest in the next frame carrying `tag`, for callers that
    /// want to do something between registering and waiting.
    ///
    /// # Errors
    /// `DuplicateWait`, `NotConnected`, or a bridged transport error.
    pub fn register_wait(&self, tag: i32) -> Result<WaitHandle> {
        let mut state = self.lock_connected()?;
        self.register_locked(&mut state, tag)
    }

    /// Takes a buffered frame: the oldest one, or the oldest carrying `tag`.
    ///
    /// # Errors
    /// `BufferEmpty`, `FrameNotFound`, or a bridged transport error.
    pub fn read_frame(&self, tag: Option<i32>) -> Result<Frame> {
        let mut state = self.shared.lock();
        state.bridge.claim()?;
        state.dispatcher.pop_frame(tag)
    }

    /// Drops buffered frames (all of them, or those carrying `tag`). Returns how many.
    pub fn clear_buffer(&self, tag: Option<i32>) -> Result<usize> {
        let mut state = self.shared.lock();
        state.bridge.claim()?;
        let cleared = state.dispatcher.clear_buffer(tag);
        self.shared.log.debug(&format!("cleared {} buffered frames", cleared));
        Ok(cleared)
    }

    /// Sends a keepalive, to check the link without waiting for the receive loop.
    pub async fn test(&self) -> Result<()> {
        self.check_connected()?;
        self.write_or_reset(&tagframe::encode_signal(tags::KEEPALIVE)).await
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().open_desired
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.link_state()
    }

    /// Watches link state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.shared.subscribe_link()
    }

    pub fn mode(&self) -> DeliveryMode {
        self.shared.config.mode
    }

    pub fn idle_timeout(&self) -> Duration {
        self.shared.lock().dispatcher.idle_timeout()
    }

    pub fn pending_tags(&self) -> Vec<i32> {
        self.shared.lock().dispatcher.pending_tags()
    }

    pub fn buffered_tags(&self) -> Vec<i32> {
        self.shared.lock().dispatcher.buffered_tags()
    }

    pub fn lost_frames(&self) -> u64 {
        self.shared.lock().dispatcher.lost_frames()
    }

    pub fn config(&self) -> &SocketConfig {
        &self.shared.config
    }

    fn check_connected(&self) -> Result<()> {
        self.lock_connected().map(drop)
    }

    /// Claims the bridge and checks the link, returning the held state lock.
    fn lock_connected(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.shared.lock();
        state.bridge.claim()?;
        if !self.shared.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(state)
    }

    fn register_locked(&self, state: &mut State, tag: i32) -> Result<WaitHandle> {
        let (id, signal) = state.dispatcher.register_wait(tag)?;
        let generation = state.dispatcher.generation();
        Ok(WaitHandle::new(tag, id, generation, signal, self.shared.clone()))
    }

    async fn write_or_reset(&self, bytes: &[u8]) -> Result<()> {
        match self.shared.write_raw(bytes).await {
            Ok(()) => Ok(()),
            Err(TransportError::ConnectionDropped) => Err(Error::NotConnected),
            Err(e) => {
                self.shared.log.info(&format!("send failed ({}), resetting connection", e));
                let mut state = self.shared.lock();
                self.shared.request_reset(&mut state);
                Err(Error::Transport(e))
            }
        }
    }
}

impl std::fmt::Debug for DataSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSocket")
            .field("destination", &self.shared.connector.describe())
            .field("link", &self.shared.link_state())
            .finish()
    }
}
