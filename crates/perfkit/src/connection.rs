//! The connection lifecycle state machine (§4.5, component E) and the
//! outbound/inbound plumbing that ties the dispatcher, resolver, and
//! subscription inbox to a transport.

use crate::config::ClientConfig;
use crate::dispatch::{AsyncCall, CallOutcome, Completion, Dispatcher};
use crate::subscription::SubscriptionInbox;
use crate::transport::{Frame, MessageKind, Transport};
use bytes::Bytes;
use perfkit_core::{PerfkitError, Resolver};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The four lifecycle states a connection passes through (§4.5). There are
/// no backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    fn name(self) -> &'static str {
        match self {
            ConnectionState::Initial => "Initial",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
        }
    }
}

/// Lifecycle events delivered to observers. `Failed` and `Disconnected`
/// both leave the connection in [`ConnectionState::Disconnected`]; the
/// event distinguishes why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Connected,
    Failed,
    Disconnected,
}

type Observer = Box<dyn Fn(StateChange) + Send + Sync>;

/// A client connection to an agent: owns the resolver, the pending-call
/// table, and the subscription table (§3 "Ownership").
///
/// Write access to the transport handle is single-writer; readers (RPC
/// send paths, response dispatch, subscription delivery) take a shared
/// read lock (§4.5, §5).
pub struct Connection<T: Transport> {
    config: ClientConfig,
    state: parking_lot::RwLock<ConnectionState>,
    transport: parking_lot::RwLock<Option<T>>,
    dispatcher: Dispatcher,
    resolver: parking_lot::Mutex<Resolver>,
    subscriptions: parking_lot::Mutex<SubscriptionInbox>,
    observers: parking_lot::Mutex<Vec<Observer>>,
}

impl<T: Transport> Connection<T> {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let subscriptions = SubscriptionInbox::new(config.object_root.clone());
        Arc::new(Connection {
            config,
            state: parking_lot::RwLock::new(ConnectionState::Initial),
            transport: parking_lot::RwLock::new(None),
            dispatcher: Dispatcher::new(),
            resolver: parking_lot::Mutex::new(Resolver::new()),
            subscriptions: parking_lot::Mutex::new(subscriptions),
            observers: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn add_observer(&self, observer: impl Fn(StateChange) + Send + Sync + 'static) {
        self.observers.lock().push(Box::new(observer));
    }

    pub fn resolver(&self) -> &parking_lot::Mutex<Resolver> {
        &self.resolver
    }

    pub fn subscriptions(&self) -> &parking_lot::Mutex<SubscriptionInbox> {
        &self.subscriptions
    }

    fn notify(&self, event: StateChange) {
        for observer in self.observers.lock().iter() {
            observer(event);
        }
    }

    /// `connect()` (§4.5): `Initial -> Connecting` immediately, then
    /// `Connecting -> Connected` or `Connecting -> Disconnected` (via
    /// `Failed`) once `setup` resolves. A second `connect()` on an
    /// already-connected or disconnected connection fails with
    /// `InvalidState` and emits no event.
    pub async fn connect<F>(&self, setup: F) -> Result<(), PerfkitError>
    where
        F: Future<Output = Result<T, PerfkitError>>,
    {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Initial {
                return Err(PerfkitError::InvalidState { expected: "Initial", found: state.name() });
            }
            *state = ConnectionState::Connecting;
        }

        match setup.await {
            Ok(transport) => {
                *self.transport.write() = Some(transport);
                *self.state.write() = ConnectionState::Connected;
                info!("connection established");
                self.notify(StateChange::Connected);
                Ok(())
            }
            Err(err) => {
                *self.state.write() = ConnectionState::Disconnected;
                warn!(error = %err, "connection setup failed");
                self.notify(StateChange::Failed);
                Err(err)
            }
        }
    }

    /// `disconnect()` (§4.5). Pending calls are completed with
    /// `Disconnected` before the lifecycle event fires (§8 "Disconnect
    /// fan-out").
    pub fn disconnect(&self) -> Result<(), PerfkitError> {
        {
            let mut state = self.state.write();
            if *state != ConnectionState::Connected {
                return Err(PerfkitError::InvalidState { expected: "Connected", found: state.name() });
            }
            *state = ConnectionState::Disconnected;
        }
        if let Some(transport) = self.transport.write().take() {
            transport.close();
        }
        self.dispatcher.disconnect_all();
        self.notify(StateChange::Disconnected);
        Ok(())
    }

    /// Called when the transport reports loss while reading (`drive`'s
    /// receive loop). A no-op if the connection already transitioned away
    /// from `Connected` through an explicit `disconnect()`.
    fn handle_transport_loss(&self) {
        let mut state = self.state.write();
        if *state != ConnectionState::Connected {
            return;
        }
        *state = ConnectionState::Disconnected;
        drop(state);
        *self.transport.write() = None;
        self.dispatcher.disconnect_all();
        self.notify(StateChange::Disconnected);
    }

    /// `X_async` (§4.4): registers a pending call, encodes the request
    /// frame, and hands it to the transport. The token is released before
    /// returning if encoding or the send fails.
    pub async fn call_async(
        &self,
        interface: impl Into<String>,
        member: impl Into<String>,
        object_path: impl Into<String>,
        body: Bytes,
        completion: Option<Completion>,
    ) -> Result<AsyncCall, PerfkitError> {
        if *self.state.read() != ConnectionState::Connected {
            return Err(PerfkitError::InvalidState {
                expected: "Connected",
                found: self.state.read().name(),
            });
        }

        let member = member.into();
        let (token, async_call) = self.dispatcher.register(member.clone(), completion);

        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            self.dispatcher.release(token);
            return Err(PerfkitError::Disconnected);
        };

        let frame = Frame {
            destination: self.config.service_name.clone(),
            interface: interface.into(),
            member,
            object_path: object_path.into(),
            token,
            kind: MessageKind::Call,
            body,
        };

        if let Err(err) = transport.send_frame(frame).await {
            self.dispatcher.release(token);
            return Err(err);
        }

        Ok(async_call)
    }

    /// `X(args) -> result | Error` (§4.4): the blocking convenience wrapper,
    /// here simply the async call awaited to completion.
    pub async fn call(
        &self,
        interface: impl Into<String>,
        member: impl Into<String>,
        object_path: impl Into<String>,
        body: Bytes,
    ) -> Result<Bytes, PerfkitError> {
        let call = self.call_async(interface, member, object_path, body, None).await?;
        Dispatcher::finish(call).await
    }

    /// `X_finish` (§4.4).
    pub async fn finish(&self, call: AsyncCall) -> Result<Bytes, PerfkitError> {
        Dispatcher::finish(call).await
    }

    /// Cancels a pending call by token (§4.4 "Completion and cancellation").
    pub fn cancel(&self, token: u64) {
        self.dispatcher.cancel(token);
    }

    /// Drives the inbound loop: reads frames from the transport and routes
    /// replies to the dispatcher or deliveries to the subscription inbox,
    /// until the transport is closed or lost.
    pub async fn drive(&self) -> Result<(), PerfkitError> {
        loop {
            let transport = match self.transport.read().clone() {
                Some(t) => t,
                None => return Ok(()),
            };

            match transport.recv_frame().await {
                Ok(frame) => self.route_inbound(frame),
                Err(_) => {
                    self.handle_transport_loss();
                    return Ok(());
                }
            }
        }
    }

    fn route_inbound(&self, frame: Frame) {
        match frame.kind {
            MessageKind::Reply => {
                self.dispatcher.complete(frame.token, CallOutcome::Reply(frame.body));
            }
            MessageKind::Error => {
                self.dispatcher.complete(
                    frame.token,
                    CallOutcome::Error { name: frame.member, detail: String::new() },
                );
            }
            MessageKind::Signal => {
                let mut resolver = self.resolver.lock();
                self.subscriptions.lock().dispatch(&frame.object_path, &frame.member, frame.body, &mut resolver);
            }
            MessageKind::Call => {
                debug!(object_path = %frame.object_path, "ignoring unexpected inbound call frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemTransport;

    fn connection() -> Arc<Connection<MemTransport>> {
        Connection::new(ClientConfig::default())
    }

    #[tokio::test]
    async fn second_connect_on_connected_fails_without_event() {
        let conn = connection();
        let (a, _b) = MemTransport::pair();
        conn.connect(async { Ok(a) }).await.unwrap();

        let events: Arc<parking_lot::Mutex<Vec<StateChange>>> = Arc::default();
        let events_clone = events.clone();
        conn.add_observer(move |e| events_clone.lock().push(e));

        let (c, _d) = MemTransport::pair();
        let err = conn.connect(async { Ok(c) }).await.unwrap_err();
        assert!(matches!(err, PerfkitError::InvalidState { .. }));
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_setup_transitions_to_disconnected_with_failed_event() {
        let conn = connection();
        let events: Arc<parking_lot::Mutex<Vec<StateChange>>> = Arc::default();
        let events_clone = events.clone();
        conn.add_observer(move |e| events_clone.lock().push(e));

        let err = conn
            .connect(async { Err(PerfkitError::TransportUnavailable("no route".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, PerfkitError::TransportUnavailable(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(events.lock().as_slice(), [StateChange::Failed]);
    }

    #[tokio::test]
    async fn observers_see_monotone_state_changes() {
        let conn = connection();
        let (a, _b) = MemTransport::pair();
        let events: Arc<parking_lot::Mutex<Vec<StateChange>>> = Arc::default();
        let events_clone = events.clone();
        conn.add_observer(move |e| events_clone.lock().push(e));

        conn.connect(async { Ok(a) }).await.unwrap();
        conn.disconnect().unwrap();

        assert_eq!(events.lock().as_slice(), [StateChange::Connected, StateChange::Disconnected]);
    }

    #[tokio::test]
    async fn disconnect_fan_out_completes_calls_before_event() {
        let conn = connection();
        let (a, b) = MemTransport::pair();
        conn.connect(async { Ok(a) }).await.unwrap();

        let order: Arc<parking_lot::Mutex<Vec<&'static str>>> = Arc::default();
        let order_clone = order.clone();
        conn.add_observer(move |e| {
            if e == StateChange::Disconnected {
                order_clone.lock().push("event");
            }
        });

        let mut calls = Vec::new();
        for _ in 0..3 {
            let order_clone = order.clone();
            let completion: Box<dyn FnOnce(&CallOutcome) + Send> =
                Box::new(move |_| order_clone.lock().push("completion"));
            calls.push(
                conn.call_async("iface", "Method", "/path", Bytes::new(), Some(completion))
                    .await
                    .unwrap(),
            );
        }
        drop(b); // transport loss, discovered by the next `drive` recv

        conn.drive().await.unwrap();

        let mut completions = 0;
        for call in calls {
            if matches!(conn.finish(call).await, Err(PerfkitError::Disconnected)) {
                completions += 1;
            }
        }

        assert_eq!(completions, 3);
        assert_eq!(
            order.lock().as_slice(),
            ["completion", "completion", "completion", "event"]
        );
    }

    #[tokio::test]
    async fn call_on_disconnected_fails_invalid_state() {
        let conn = connection();
        let err = conn.call("iface", "Method", "/path", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, PerfkitError::InvalidState { .. }));
    }
}
