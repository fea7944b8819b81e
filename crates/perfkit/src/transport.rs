//! The external transport interface (§6) and an in-process test double.
//!
//! The concrete transport implementation is out of scope (§1 Non-goals):
//! any reliable, message-oriented, bidirectional channel that carries
//! frames shaped like [`Frame`] suffices. [`MemTransport`] is the test
//! double the rest of this crate's unit tests drive the dispatcher,
//! connection lifecycle, and subscription inbox with.

use bytes::Bytes;
use perfkit_core::PerfkitError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A request, reply, error, or signal frame (§6).
#[derive(Debug, Clone)]
pub struct Frame {
    pub destination: String,
    pub interface: String,
    pub member: String,
    pub object_path: String,
    pub token: u64,
    pub kind: MessageKind,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Call,
    Reply,
    Error,
    Signal,
}

/// A bidirectional, message-oriented channel carrying [`Frame`]s.
///
/// Implementations are expected to be cheaply cloneable handles onto
/// shared, open connection state (as [`MemTransport`] is).
pub trait Transport: Clone + Send + Sync + 'static {
    fn send_frame(&self, frame: Frame) -> impl Future<Output = Result<(), PerfkitError>> + Send;
    fn recv_frame(&self) -> impl Future<Output = Result<Frame, PerfkitError>> + Send;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

const CHANNEL_CAPACITY: usize = 64;

/// An in-process transport pair backed by `tokio::sync::mpsc`, used as a
/// test double in place of a real socket.
#[derive(Clone, Debug)]
pub struct MemTransport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: mpsc::Sender<Frame>,
    rx: Mutex<mpsc::Receiver<Frame>>,
    closed: AtomicBool,
}

impl MemTransport {
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = Arc::new(Inner { tx: tx_b, rx: Mutex::new(rx_a), closed: AtomicBool::new(false) });
        let b = Arc::new(Inner { tx: tx_a, rx: Mutex::new(rx_b), closed: AtomicBool::new(false) });

        (MemTransport { inner: a }, MemTransport { inner: b })
    }
}

impl Transport for MemTransport {
    async fn send_frame(&self, frame: Frame) -> Result<(), PerfkitError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PerfkitError::Disconnected);
        }
        self.inner.tx.send(frame).await.map_err(|_| PerfkitError::Disconnected)
    }

    async fn recv_frame(&self) -> Result<Frame, PerfkitError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PerfkitError::Disconnected);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(PerfkitError::Disconnected)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(token: u64) -> Frame {
        Frame {
            destination: "org.perfkit.Agent".into(),
            interface: "org.perfkit.Agent.Manager".into(),
            member: "Ping".into(),
            object_path: "/org/perfkit/Agent/Manager".into(),
            token,
            kind: MessageKind::Call,
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn frames_flow_in_both_directions() {
        let (a, b) = MemTransport::pair();
        a.send_frame(frame(1)).await.unwrap();
        let received = b.recv_frame().await.unwrap();
        assert_eq!(received.token, 1);

        b.send_frame(frame(2)).await.unwrap();
        let received = a.recv_frame().await.unwrap();
        assert_eq!(received.token, 2);
    }

    #[tokio::test]
    async fn closed_transport_rejects_send_and_recv() {
        let (a, _b) = MemTransport::pair();
        a.close();
        assert!(a.is_closed());
        assert!(matches!(a.send_frame(frame(1)).await, Err(PerfkitError::Disconnected)));
        assert!(matches!(a.recv_frame().await, Err(PerfkitError::Disconnected)));
    }

    #[tokio::test]
    async fn dropping_peer_surfaces_as_disconnected() {
        let (a, b) = MemTransport::pair();
        drop(b);
        assert!(matches!(a.send_frame(frame(1)).await, Err(PerfkitError::Disconnected)));
    }
}
