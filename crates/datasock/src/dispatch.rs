//! # Dispatcher
//!
//! The correlation table between frames coming off the wire and the callers
//! waiting for them.
//!
//! ## Invariants
//! - **One Wait Per Tag**: a second registration for a tag that is still
//!   pending fails; it is never merged.
//! - **One Frame, One Wake**: a delivered frame satisfies at most the oldest
//!   wait registered for its tag.
//! - **Backlog Survives Resets**: `reset_all` wakes every wait but leaves the
//!   buffered frames for the caller to consume or clear.
//!
//! The dispatcher holds no lock of its own; the socket keeps it behind its
//! state mutex.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tagframe::Frame;

use crate::error::Error;
use crate::error::Result;
use crate::wait::Signal;

/// Which frames the dispatcher keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Only frames matching an outstanding wait are buffered; others are lost.
    #[default]
    Selective,
    /// Every frame is buffered, matched or not.
    NonSelective,
}

/// What happened to a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A wait was satisfied and the frame buffered.
    Matched,
    /// No wait matched; the frame was buffered anyway (non-selective).
    Buffered,
    /// No wait matched; the frame was dropped (selective).
    Lost,
}

/// Identifies one registration, so a timed-out wait removes itself and not a
/// later registration for the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitId(pub u64);

#[derive(Debug)]
struct PendingWait {
    id: WaitId,
    tag: i32,
    signal: Arc<Signal>,
}

#[derive(Debug)]
pub struct Dispatcher {
    mode: DeliveryMode,
    pending: VecDeque<PendingWait>,
    buffered: VecDeque<Frame>,
    next_wait_id: u64,
    last_activity: Instant,
    idle_timeout: Duration,
    lost: u64,
    generation: u64,
}

impl Dispatcher {
    pub fn new(mode: DeliveryMode, idle_timeout: Duration) -> Self {
        Self {
            mode,
            pending: VecDeque::new(),
            buffered: VecDeque::new(),
            next_wait_id: 1,
            last_activity: Instant::now(),
            idle_timeout,
            lost: 0,
            generation: 0,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn set_idle_timeout(&mut self, idle_timeout: Duration) {
        self.idle_timeout = idle_timeout;
    }

    /// Registers interest in the next frame carrying `tag`.
    ///
    /// # Errors
    /// Returns `Error::DuplicateWait` if a wait for `tag` is still pending.
    pub fn register_wait(&mut self, tag: i32) -> Result<(WaitId, Arc<Signal>)> {
        if self.pending.iter().any(|w| w.tag == tag) {
            return Err(Error::DuplicateWait { tag });
        }

        let id = WaitId(self.next_wait_id);
        self.next_wait_id += 1;

        let signal = Arc::new(Signal::new());
        self.pending.push_back(PendingWait { id, tag, signal: signal.clone() });
        Ok((id, signal))
    }

    /// Publishes a frame read off the wire.
    pub fn deliver(&mut self, frame: Frame) -> Delivery {
        self.deliver_at(frame, Instant::now())
    }

    pub fn deliver_at(&mut self, frame: Frame, now: Instant) -> Delivery {
        let matched = self.pending.iter().position(|w| w.tag == frame.tag);

        match (matched, self.mode) {
            (Some(idx), _) => {
                self.buffered.push_back(frame);
                if let Some(wait) = self.pending.remove(idx) {
                    wait.signal.set();
                }
                self.last_activity = now;
                Delivery::Matched
            }
            (None, DeliveryMode::NonSelective) => {
                self.buffered.push_back(frame);
                Delivery::Buffered
            }
            (None, DeliveryMode::Selective) => {
                self.lost += 1;
                Delivery::Lost
            }
        }
    }

    /// Removes a wait that gave up. Returns false if it was already gone
    /// (satisfied or swept by a reset); only an actual removal counts as activity.
    pub fn remove_wait(&mut self, id: WaitId, now: Instant) -> bool {
        match self.pending.iter().position(|w| w.id == id) {
            Some(idx) => {
                self.pending.remove(idx);
                self.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Takes the oldest buffered frame, or the oldest one carrying `tag`.
    pub fn pop_frame(&mut self, tag: Option<i32>) -> Result<Frame> {
        if self.buffered.is_empty() {
            return Err(Error::BufferEmpty);
        }

        let Some(tag) = tag else {
            return self.buffered.pop_front().ok_or(Error::BufferEmpty);
        };

        self.buffered
            .iter()
            .position(|f| f.tag == tag)
            .and_then(|idx| self.buffered.remove(idx))
            .ok_or(Error::FrameNotFound { tag })
    }

    /// Drops every buffered frame, or only those carrying `tag`. Returns how many.
    pub fn clear_buffer(&mut self, tag: Option<i32>) -> usize {
        let before = self.buffered.len();
        match tag {
            None => self.buffered.clear(),
            Some(tag) => self.buffered.retain(|f| f.tag != tag),
        }
        before - self.buffered.len()
    }

    /// Wakes every pending wait and forgets them. Buffered frames stay.
    ///
    /// Starts a new generation: waits registered before it know they were
    /// woken by the reset and not by a frame.
    pub fn reset_all(&mut self) -> usize {
        self.generation += 1;
        let woken = self.pending.len();
        for wait in self.pending.drain(..) {
            wait.signal.set();
        }
        woken
    }

    /// False once the connection has been idle past the timeout with nobody waiting.
    pub fn is_active(&self, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.last_activity);
        !(idle > self.idle_timeout && self.pending.is_empty())
    }

    /// Number of resets so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn has_buffered(&self, tag: i32) -> bool {
        self.buffered.iter().any(|f| f.tag == tag)
    }

    pub fn is_pending(&self, tag: i32) -> bool {
        self.pending.iter().any(|w| w.tag == tag)
    }

    pub fn pending_tags(&self) -> Vec<i32> {
        self.pending.iter().map(|w| w.tag).collect()
    }

    pub fn buffered_tags(&self) -> Vec<i32> {
        self.buffered.iter().map(|f| f.tag).collect()
    }

    /// Frames dropped because nobody waited for them (selective mode).
    pub fn lost_frames(&self) -> u64 {
        self.lost
    }
}
