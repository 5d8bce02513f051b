//! Wait registrations handed to callers.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Notify;

use crate::dispatch::WaitId;
use crate::error::Error;
use crate::error::Result;
use crate::shared::Shared;
use crate::transport::TransportError;

/// A one-shot flag a task can sleep on.
///
/// Setting it is sticky: a waiter arriving after `set` returns at once.
#[derive(Debug, Default)]
pub struct Signal {
    set: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.set.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Sleeps until set or until `timeout` elapses. Returns the flag.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_set() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        self.is_set()
    }
}

/// An outstanding request for the next frame carrying one tag.
///
/// Obtained from [`DataSocket::register_wait`](crate::DataSocket::register_wait).
/// Waking up only means "look again": after the wait, the frame is fetched
/// with `read_frame`. Dropping the handle withdraws a registration that is
/// still pending, so a cancelled wait never blocks its tag.
pub struct WaitHandle {
    tag: i32,
    id: WaitId,
    generation: u64,
    signal: Arc<Signal>,
    shared: Arc<Shared>,
}

impl WaitHandle {
    pub(crate) fn new(tag: i32, id: WaitId, generation: u64, signal: Arc<Signal>, shared: Arc<Shared>) -> Self {
        Self { tag, id, generation, signal, shared }
    }

    pub fn tag(&self) -> i32 {
        self.tag
    }

    pub fn id(&self) -> WaitId {
        self.id
    }

    /// Wakes the waiter as if its frame had arrived.
    ///
    /// The registration stays pending until a frame, a timeout or a reset removes it.
    pub fn signal(&self) {
        self.signal.set();
    }

    /// Non-blocking check.
    ///
    /// # Errors
    /// A bridged transport error, or `ConnectionDropped` if the link is down
    /// or was reset since the registration.
    pub fn is_signalled(&self) -> Result<bool> {
        let mut state = self.shared.lock();
        state.bridge.claim()?;
        if !self.shared.is_connected() || state.dispatcher.generation() != self.generation {
            return Err(Error::Transport(TransportError::ConnectionDropped));
        }
        Ok(self.signal.is_set())
    }

    /// Blocks until the frame arrives, the link drops, or `timeout` elapses.
    ///
    /// # Errors
    /// - A bridged transport error, or `ConnectionDropped` if woken by a reset,
    ///   even when the link has reconnected since.
    /// - `Timeout` if nothing arrived; the registration is removed so the tag
    ///   can be requested again.
    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        let signalled = self.signal.wait(timeout).await;

        let mut state = self.shared.lock();
        state.bridge.claim()?;
        if !self.shared.is_connected() || state.dispatcher.generation() != self.generation {
            return Err(Error::Transport(TransportError::ConnectionDropped));
        }
        if !signalled && !self.signal.is_set() {
            let now = self.shared.now();
            state.dispatcher.remove_wait(self.id, now);
            self.shared.log.debug(&format!("wait for tag {} timed out", self.tag));
            return Err(Error::Timeout { tag: self.tag });
        }
        Ok(())
    }

    /// Withdraws the registration without waiting. Returns false if it was
    /// already satisfied or swept.
    pub fn cancel(&self) -> bool {
        let now = self.shared.now();
        self.shared.lock().dispatcher.remove_wait(self.id, now)
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHandle")
            .field("tag", &self.tag)
            .field("id", &self.id)
            .field("signalled", &self.signal.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_set_before_wait() {
        let signal = Signal::new();
        signal.set();
        assert!(signal.wait(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_signal_times_out() {
        let signal = Signal::new();
        assert!(!signal.wait(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_signal_wakes_parked_waiter() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.set();
        assert!(waiter.await.unwrap());
    }
}
