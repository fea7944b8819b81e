//! RPC surface bindings (§6): object path templates, response decoders,
//! and argument encoding for the representative set of methods this crate
//! implements.
//!
//! The full mechanical RPC surface (every method listed in §6) is a
//! Non-goal (§1: "all generated proxy wrappers for individual RPCs...
//! each is a mechanical application of §4.4"); this module implements the
//! dispatcher pattern itself plus enough bindings to exercise it end to
//! end — `Manager.Ping`, `Manager.GetVersion`, `Manager.AddChannel`,
//! `Manager.AddSubscription`/`RemoveSubscription`, and `Channel.GetArgs`/
//! `Start`/`Stop`/`GetState`.

use bytes::Bytes;
use perfkit_core::{Reader, WireKind, Writer};
use perfkit_core::PerfkitError;

/// Builds an object path from the configured root, a kind segment, and an
/// identifier (§6 "Object path conventions").
pub fn object_path(root: &str, kind: &str, id: impl std::fmt::Display) -> String {
    format!("{root}/{kind}/{id}")
}

/// Parses a trailing decimal id off an object path of the form
/// `<root>/<kind>/<id>` (§9 "inline object-path parsing").
pub fn parse_object_path_id(path: &str, root: &str, kind: &str) -> Option<u64> {
    let prefix = format!("{root}/{kind}/");
    path.strip_prefix(&prefix)?.parse().ok()
}

/// The agent-side channel lifecycle state (§6 "Channel state enum").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Ready = 1,
    Running = 2,
    Muted = 3,
    Stopped = 4,
    Failed = 5,
}

impl ChannelState {
    pub fn from_wire(v: u32) -> Result<Self, PerfkitError> {
        Ok(match v {
            1 => ChannelState::Ready,
            2 => ChannelState::Running,
            3 => ChannelState::Muted,
            4 => ChannelState::Stopped,
            5 => ChannelState::Failed,
            other => {
                return Err(PerfkitError::ProtocolError(format!("unknown channel state {other}")))
            }
        })
    }
}

/// `Manager.Ping`'s reply field is an ISO 8601 string (§8 scenario 1);
/// decodes it to epoch microseconds using the same `chrono` crate the
/// wider example pack reaches for when parsing timestamps.
pub fn decode_ping_reply(body: &Bytes) -> Result<u64, PerfkitError> {
    let mut reader = Reader::new(body.clone());
    let (field, kind) = reader.read_tag()?;
    if field != 1 || kind != WireKind::LengthDelimited {
        return Err(PerfkitError::ProtocolError("expected field 1, length-delimited timestamp".into()));
    }
    let text = reader.read_string()?;
    let parsed = chrono::DateTime::parse_from_rfc3339(&text)
        .map_err(|e| PerfkitError::ProtocolError(format!("invalid ping timestamp {text:?}: {e}")))?;
    Ok(parsed.timestamp_micros() as u64)
}

/// Decodes a reply carrying a single string field, e.g. `Manager.GetVersion`.
pub fn decode_string_reply(body: &Bytes) -> Result<String, PerfkitError> {
    let mut reader = Reader::new(body.clone());
    let (field, kind) = reader.read_tag()?;
    if field != 1 || kind != WireKind::LengthDelimited {
        return Err(PerfkitError::ProtocolError("expected field 1, length-delimited string".into()));
    }
    reader.read_string().map_err(Into::into)
}

/// Decodes a reply carrying a single object-path string field and extracts
/// its trailing id, e.g. `Manager.AddChannel` (§8 scenario 2).
pub fn decode_object_path_reply(body: &Bytes, root: &str, kind: &str) -> Result<u64, PerfkitError> {
    let path = decode_string_reply(body)?;
    parse_object_path_id(&path, root, kind)
        .ok_or_else(|| PerfkitError::ProtocolError(format!("reply path {path:?} does not match {root}/{kind}/<id>")))
}

/// Encodes the no-argument request body every RPC with an empty argument
/// list uses.
pub fn encode_no_args() -> Bytes {
    Bytes::new()
}

/// Encodes a single `channel` handle argument, the shape `RemoveChannel`
/// and similar single-handle RPCs take.
pub fn encode_channel_arg(channel_id: u64) -> Bytes {
    let mut w = Writer::new();
    w.write_tag(1, WireKind::Varint);
    w.write_varint_u64_value(channel_id);
    w.into_bytes()
}

/// Encodes `AddSubscription(buffer_size, timeout, encoder)`'s argument list.
pub fn encode_add_subscription_args(buffer_size: u32, timeout_ms: u32, encoder: u64) -> Bytes {
    let mut w = Writer::new();
    w.write_tag(1, WireKind::Varint);
    w.write_varint_u32(buffer_size);
    w.write_tag(2, WireKind::Varint);
    w.write_varint_u32(timeout_ms);
    w.write_tag(3, WireKind::Varint);
    w.write_varint_u64_value(encoder);
    w.into_bytes()
}

/// Decodes a reply carrying a repeated string list under a single field 1,
/// e.g. `Channel.GetArgs`/`GetEnv`.
pub fn decode_string_list_reply(body: &Bytes) -> Result<Vec<String>, PerfkitError> {
    let mut reader = Reader::new(body.clone());
    let (field, kind) = reader.read_tag()?;
    if field != 1 || kind != WireKind::Repeated {
        return Err(PerfkitError::ProtocolError("expected field 1, repeated string list".into()));
    }
    let mut region = reader.read_nested_region()?;
    let mut items = Vec::new();
    while !region.is_empty() {
        items.push(region.read_string()?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_round_trips() {
        let path = object_path("/org/perfkit/Agent", "Channel", 7);
        assert_eq!(path, "/org/perfkit/Agent/Channel/7");
        assert_eq!(parse_object_path_id(&path, "/org/perfkit/Agent", "Channel"), Some(7));
    }

    #[test]
    fn ping_reply_decodes_iso8601_to_epoch_micros() {
        let mut w = Writer::new();
        w.write_tag(1, WireKind::LengthDelimited);
        w.write_string("2010-01-01T00:00:00Z");
        let body = w.into_bytes();

        let micros = decode_ping_reply(&body).unwrap();
        assert_eq!(micros, 1_262_304_000_000_000);
    }

    #[test]
    fn channel_creation_reply_extracts_id() {
        let mut w = Writer::new();
        w.write_tag(1, WireKind::LengthDelimited);
        w.write_string("/org/perfkit/Agent/Channel/7");
        let body = w.into_bytes();

        let id = decode_object_path_reply(&body, "/org/perfkit/Agent", "Channel").unwrap();
        assert_eq!(id, 7);
    }

    #[test]
    fn channel_state_rejects_unknown_value() {
        assert!(matches!(ChannelState::from_wire(1), Ok(ChannelState::Ready)));
        assert!(ChannelState::from_wire(99).is_err());
    }
}
