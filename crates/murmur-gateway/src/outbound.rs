use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::DeliveryError;

/// Sending half of one client's duplex channel, as seen by the hub.
///
/// `send` must not block: it hands the frame to whatever drains the
/// connection and reports whether that handoff succeeded.
pub trait Outbound: Send + Sync {
    fn send(&self, frame: Bytes) -> Result<(), DeliveryError>;
}

/// Outbound backed by a bounded queue that a per-connection writer task
/// drains to the socket. A full queue means the client is not keeping up.
pub struct QueueOutbound {
    tx: mpsc::Sender<Bytes>,
}

impl QueueOutbound {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Creates the outbound together with the receiver its writer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl Outbound for QueueOutbound {
    fn send(&self, frame: Bytes) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_is_backpressure() {
        let (outbound, _rx) = QueueOutbound::channel(1);
        assert!(outbound.send(Bytes::from_static(b"a")).is_ok());
        assert_eq!(outbound.send(Bytes::from_static(b"b")), Err(DeliveryError::Backpressure));
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (outbound, rx) = QueueOutbound::channel(4);
        drop(rx);
        assert_eq!(outbound.send(Bytes::from_static(b"a")), Err(DeliveryError::Closed));
    }
}
