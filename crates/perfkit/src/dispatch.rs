//! The RPC dispatcher (§4.4, component F): builds request frames, tracks
//! pending calls by correlation token, and completes them on reply,
//! cancellation, or disconnect.

use bytes::Bytes;
use perfkit_core::PerfkitError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How a pending call was resolved.
#[derive(Debug)]
pub enum CallOutcome {
    Reply(Bytes),
    Error { name: String, detail: String },
    Cancelled,
    Disconnected,
}

impl CallOutcome {
    fn into_result(self) -> Result<Bytes, PerfkitError> {
        match self {
            CallOutcome::Reply(body) => Ok(body),
            CallOutcome::Error { name, detail } => Err(PerfkitError::RpcError { name, detail }),
            CallOutcome::Cancelled => Err(PerfkitError::Cancelled),
            CallOutcome::Disconnected => Err(PerfkitError::Disconnected),
        }
    }
}

pub type Completion = Box<dyn FnOnce(&CallOutcome) + Send>;

struct PendingCall {
    #[allow(dead_code)]
    method: String,
    sender: oneshot::Sender<CallOutcome>,
    completion: Option<Completion>,
}

/// A table of in-flight RPCs keyed by correlation token, allocated
/// monotonically so a `BTreeMap`'s ascending iteration order is allocation
/// order (needed for disconnect fan-out, §8 "Dispatcher properties").
#[derive(Default)]
pub struct Dispatcher {
    next_token: AtomicU64,
    pending: parking_lot::Mutex<BTreeMap<u64, PendingCall>>,
}

/// A handle to an in-flight RPC returned by `X_async` (§4.4). Holding this
/// is what lets a caller cancel the call or, later, extract its result via
/// [`Dispatcher::finish`].
pub struct AsyncCall {
    token: u64,
    rx: oneshot::Receiver<CallOutcome>,
}

impl AsyncCall {
    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher { next_token: AtomicU64::new(1), pending: parking_lot::Mutex::new(BTreeMap::new()) }
    }

    /// Registers a pending call for `method` and returns its token plus an
    /// [`AsyncCall`] handle. The token is never reused while the call is
    /// outstanding (§8 "Dispatcher properties").
    pub fn register(
        &self,
        method: impl Into<String>,
        completion: Option<Completion>,
    ) -> (u64, AsyncCall) {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let call = PendingCall { method: method.into(), sender: tx, completion };
        self.pending.lock().insert(token, call);
        (token, AsyncCall { token, rx })
    }

    /// Releases a token without completing it, used when request encoding
    /// fails before the frame is ever sent (§4.4 "Failure semantics").
    pub fn release(&self, token: u64) {
        self.pending.lock().remove(&token);
    }

    /// Completes a pending call with its outcome. A token with no pending
    /// entry (already cancelled or already completed) is silently ignored —
    /// this is how a late reply after cancellation is dropped.
    pub fn complete(&self, token: u64, outcome: CallOutcome) {
        let entry = self.pending.lock().remove(&token);
        match entry {
            Some(call) => {
                if let Some(completion) = call.completion {
                    completion(&outcome);
                }
                let _ = call.sender.send(outcome);
            }
            None => {
                debug!(token, "dropping completion for unknown or already-resolved call");
            }
        }
    }

    /// Cancels a pending call: removes its entry and fires its completion
    /// with `Cancelled`. Any reply for this token that arrives afterward is
    /// silently dropped by [`Dispatcher::complete`] finding no entry.
    pub fn cancel(&self, token: u64) {
        let entry = self.pending.lock().remove(&token);
        if let Some(call) = entry {
            if let Some(completion) = call.completion {
                completion(&CallOutcome::Cancelled);
            }
            let _ = call.sender.send(CallOutcome::Cancelled);
        }
    }

    /// Completes every pending call with `Disconnected`, in allocation
    /// order (§8 "Disconnecting with N pending calls produces N
    /// Disconnected completions").
    pub fn disconnect_all(&self) {
        let drained: Vec<(u64, PendingCall)> = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending).into_iter().collect()
        };
        if !drained.is_empty() {
            warn!(count = drained.len(), "completing pending calls with Disconnected");
        }
        for (_, call) in drained {
            if let Some(completion) = call.completion {
                completion(&CallOutcome::Disconnected);
            }
            let _ = call.sender.send(CallOutcome::Disconnected);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Awaits an `AsyncCall`'s outcome and turns it into the raw reply
    /// bytes or a typed error (§4.4 "Result extraction").
    pub async fn finish(call: AsyncCall) -> Result<Bytes, PerfkitError> {
        match call.rx.await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(PerfkitError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_completes_with_cancelled_at_most_once() {
        let dispatcher = Dispatcher::new();
        let (token, call) = dispatcher.register("Ping", None);
        dispatcher.cancel(token);
        assert_eq!(dispatcher.pending_count(), 0);
        let result = Dispatcher::finish(call).await;
        assert!(matches!(result, Err(PerfkitError::Cancelled)));
    }

    #[tokio::test]
    async fn late_reply_after_cancel_is_dropped() {
        let dispatcher = Dispatcher::new();
        let (token, call) = dispatcher.register("Ping", None);
        dispatcher.cancel(token);
        // A reply that arrives after cancellation finds no pending entry.
        dispatcher.complete(token, CallOutcome::Reply(Bytes::from_static(b"late")));
        let result = Dispatcher::finish(call).await;
        assert!(matches!(result, Err(PerfkitError::Cancelled)));
    }

    #[tokio::test]
    async fn disconnect_completes_all_pending_calls() {
        let dispatcher = Dispatcher::new();
        let (_t1, c1) = dispatcher.register("Ping", None);
        let (_t2, c2) = dispatcher.register("GetVersion", None);
        let (_t3, c3) = dispatcher.register("GetChannels", None);

        dispatcher.disconnect_all();
        assert_eq!(dispatcher.pending_count(), 0);

        for call in [c1, c2, c3] {
            assert!(matches!(Dispatcher::finish(call).await, Err(PerfkitError::Disconnected)));
        }
    }

    #[tokio::test]
    async fn tokens_are_never_reused_while_outstanding() {
        let dispatcher = Dispatcher::new();
        let (t1, _c1) = dispatcher.register("Ping", None);
        let (t2, _c2) = dispatcher.register("Ping", None);
        assert_ne!(t1, t2);
    }

    #[tokio::test]
    async fn release_drops_token_without_completing() {
        let dispatcher = Dispatcher::new();
        let (token, call) = dispatcher.register("Ping", None);
        dispatcher.release(token);
        assert_eq!(dispatcher.pending_count(), 0);
        drop(call); // receiver dropped without ever observing an outcome
    }

    #[tokio::test]
    async fn reply_completes_waiting_finish() {
        let dispatcher = Dispatcher::new();
        let (token, call) = dispatcher.register("Ping", None);
        dispatcher.complete(token, CallOutcome::Reply(Bytes::from_static(b"pong")));
        let body = Dispatcher::finish(call).await.unwrap();
        assert_eq!(&body[..], b"pong");
    }
}
