//! Client-side RPC and streaming runtime for the Perfkit instrumentation
//! protocol.
//!
//! Ties together the wire codec and manifest/sample decoding from
//! `perfkit-core` with a connection lifecycle, RPC dispatcher, and
//! subscription inbox driven by a pluggable [`transport::Transport`].

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod handles;
pub mod rpc;
pub mod subscription;
pub mod transport;

pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState, StateChange};
pub use dispatch::{AsyncCall, CallOutcome};
pub use handles::{Channel, Encoder, Manager, Plugin, Source, Subscription};
pub use subscription::SubscriptionCallbacks;
pub use transport::{Frame, MemTransport, MessageKind, Transport};

pub use perfkit_core::{Manifest, PerfkitError, Resolution, Resolver, Row, Sample, TypeCode, Value, WireError};
