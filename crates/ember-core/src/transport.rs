use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use ember_types::events::WireMessage;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
}

/// Outbound half of the push transport. Fire-and-forget: returning `Ok`
/// means the payload was handed off, not that the peer received it.
pub trait Transport: Send + Sync {
    fn send(&self, payload: WireMessage) -> Result<(), TransportError>;
}

/// Hands payloads to whatever task owns the receiving end (usually the
/// socket writer of the real transport).
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<WireMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, payload: WireMessage) -> Result<(), TransportError> {
        self.tx.send(payload).map_err(|_| TransportError::Closed)
    }
}

/// Offline mode. Counts what would have been sent.
#[derive(Clone, Default)]
pub struct NullTransport {
    dropped: Arc<AtomicUsize>,
}

impl NullTransport {
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Transport for NullTransport {
    fn send(&self, _payload: WireMessage) -> Result<(), TransportError> {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
