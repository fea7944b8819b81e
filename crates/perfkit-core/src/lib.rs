//! Wire codec and manifest/sample decoding for the Perfkit instrumentation
//! protocol.
//!
//! This crate covers components A-D of the client runtime: the binary wire
//! format, manifest and sample decoding, and the per-connection resolver
//! that pairs samples with their governing manifest. It has no transport or
//! RPC dispatch logic — see the `perfkit` crate for that.

pub mod error;
pub mod manifest;
pub mod resolver;
pub mod sample;
pub mod wire;

pub use error::{PerfkitError, WireError};
pub use manifest::{Manifest, Resolution, Row, TypeCode};
pub use resolver::Resolver;
pub use sample::{Sample, Value};
pub use wire::{Reader, WireKind, Writer};
