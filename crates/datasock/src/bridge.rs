//! One-shot mailbox carrying a connection manager failure to the next caller.
//!
//! The slot lives behind the socket's state lock. The manager publishes into
//! it when its receive loop exits on an error; every public operation claims
//! it before doing anything else. A claimed error is gone: when several
//! callers race right after a fault, only the first one sees it.

use crate::error::Error;
use crate::error::Result;
use crate::transport::TransportError;

#[derive(Debug, Default)]
pub struct ErrorBridge {
    slot: Option<TransportError>,
}

impl ErrorBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `error`, replacing one nobody claimed yet.
    pub fn publish(&mut self, error: TransportError) -> Option<TransportError> {
        self.slot.replace(error)
    }

    /// Takes the pending error and returns it as `Err`, leaving the slot empty.
    pub fn claim(&mut self) -> Result<()> {
        match self.slot.take() {
            Some(error) => Err(Error::Transport(error)),
            None => Ok(()),
        }
    }

    pub fn clear(&mut self) -> Option<TransportError> {
        self.slot.take()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }

    pub fn peek(&self) -> Option<&TransportError> {
        self.slot.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_one_shot() {
        let mut bridge = ErrorBridge::new();
        assert!(bridge.claim().is_ok());

        bridge.publish(TransportError::DriverError);
        assert!(bridge.is_pending());

        assert_eq!(bridge.claim(), Err(Error::Transport(TransportError::DriverError)));
        assert!(!bridge.is_pending());
        assert!(bridge.claim().is_ok());
    }

    #[test]
    fn test_publish_replaces_unclaimed() {
        let mut bridge = ErrorBridge::new();
        assert_eq!(bridge.publish(TransportError::DriverError), None);
        assert_eq!(
            bridge.publish(TransportError::ConnectionDropped),
            Some(TransportError::DriverError)
        );
        assert_eq!(bridge.peek(), Some(&TransportError::ConnectionDropped));
        assert_eq!(bridge.clear(), Some(TransportError::ConnectionDropped));
        assert!(bridge.claim().is_ok());
    }
}
