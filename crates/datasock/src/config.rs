//! Configuration for data socket behavior.

use std::time::Duration;

use crate::dispatch::DeliveryMode;

/// Configuration for delivery, reconnection and idle-timeout behavior.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// Which received frames are retained in the buffer.
    pub mode: DeliveryMode,

    /// Inactivity after which an unused connection may be torn down.
    ///
    /// Also announced to the driver on every connect, so it closes idle
    /// sockets on its side.
    pub idle_timeout: Duration,

    /// Added to `idle_timeout` in the value announced to the driver.
    pub timeout_margin: Duration,

    /// First delay after a failed connection attempt.
    pub reconnect_initial: Duration,

    /// Upper bound of the reconnection delay.
    pub reconnect_max: Duration,

    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,

    /// Timeout used by the `*_default` request helpers.
    pub reply_timeout: Duration,

    /// Timeout for the answer to an idle-timeout update.
    pub idle_config_timeout: Duration,

    /// Maximum number of partial reads to assemble one field.
    pub max_fragments: usize,

    /// Largest payload length accepted from the driver.
    pub max_payload: usize,

    /// How often `wait_connected` re-checks the bridge while waiting.
    pub connected_poll: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Selective,
            idle_timeout: Duration::from_secs(18),
            timeout_margin: Duration::from_secs(2),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30), // driver drops idle clients after 20s
            connect_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
            idle_config_timeout: Duration::from_secs(5),
            max_fragments: 100,
            max_payload: 64 * 1024 * 1024,
            connected_poll: Duration::from_millis(500),
        }
    }
}

impl SocketConfig {
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the exponential backoff bounds for reconnection.
    pub fn with_reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn with_max_fragments(mut self, max_fragments: usize) -> Self {
        self.max_fragments = max_fragments;
        self
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Configuration for tests against an in-memory peer: short delays, fast polling.
    pub fn local_test() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(10),
            reconnect_max: Duration::from_millis(100),
            connect_timeout: Duration::from_millis(500),
            reply_timeout: Duration::from_secs(1),
            idle_config_timeout: Duration::from_secs(1),
            connected_poll: Duration::from_millis(20),
            ..Self::default()
        }
    }

    /// Idle timeout value sent to the driver, in whole seconds.
    ///
    /// Saturates at `i32::MAX` for timeouts too large for the wire.
    pub fn announced_idle_secs(&self, idle_timeout: Duration) -> i32 {
        let secs = idle_timeout.saturating_add(self.timeout_margin).as_secs();
        i32::try_from(secs).unwrap_or(i32::MAX)
    }
}
