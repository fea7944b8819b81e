//! The wire buffer codec (§4.1): tag/value encoded, length-prefixed binary
//! primitives shared by manifest and sample decoding.
//!
//! Field numbers and wire kinds are packed into a single varint tag, the way
//! a protobuf-style tag byte works: `tag = (field << 3) | kind`. Multi-byte
//! values are little-endian; varints use 7-bit continuation groups with the
//! MSB meaning "more bytes follow".

use crate::error::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// One of the six wire kinds a tag can carry (§3 "Wire primitives").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Enum = 3,
    Repeated = 4,
    Fixed32 = 5,
}

impl WireKind {
    fn from_u8(v: u8) -> Result<Self, WireError> {
        Ok(match v {
            0 => WireKind::Varint,
            1 => WireKind::Fixed64,
            2 => WireKind::LengthDelimited,
            3 => WireKind::Enum,
            4 => WireKind::Repeated,
            5 => WireKind::Fixed32,
            other => return Err(WireError::InvalidTag(other)),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            WireKind::Varint => "varint",
            WireKind::Fixed64 => "fixed64",
            WireKind::LengthDelimited => "length-delimited",
            WireKind::Enum => "enum",
            WireKind::Repeated => "repeated",
            WireKind::Fixed32 => "fixed32",
        }
    }
}

const MAX_VARINT_BYTES: usize = 10;

/// A streaming-friendly reader over an in-memory buffer.
///
/// Every `read_*` method consumes exactly one value on success. On failure
/// the read position is left unchanged, so callers may retry at a higher
/// level (e.g. to check for EOF versus malformed data).
#[derive(Debug, Clone)]
pub struct Reader {
    data: Bytes,
    pos: usize,
}

impl Reader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Reader { data: data.into(), pos: 0 }
    }

    /// Bytes remaining to be read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn peek_slice(&self, len: usize) -> Result<&[u8], WireError> {
        if len > self.remaining() {
            return Err(WireError::Eof);
        }
        Ok(&self.data[self.pos..self.pos + len])
    }

    /// Reads `(field, kind)` from a tag varint. Fails if the buffer is
    /// exhausted or the tag byte is malformed.
    pub fn read_tag(&mut self) -> Result<(u32, WireKind), WireError> {
        let start = self.pos;
        let raw = match self.read_varint_u64_inner() {
            Ok(v) => v,
            Err(e) => {
                self.pos = start;
                return Err(e);
            }
        };
        let kind = match WireKind::from_u8((raw & 0x7) as u8) {
            Ok(k) => k,
            Err(e) => {
                trace!(raw_kind = raw & 0x7, "malformed tag byte, rolling back read position");
                self.pos = start;
                return Err(e);
            }
        };
        Ok(((raw >> 3) as u32, kind))
    }

    fn read_varint_u64_inner(&mut self) -> Result<u64, WireError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        for _ in 0..MAX_VARINT_BYTES {
            let byte = *self.peek_slice(1).map_err(|_| WireError::Eof)?.first().unwrap();
            self.pos += 1;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
        Err(WireError::VarintTooLong)
    }

    fn with_rollback<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, WireError>) -> Result<T, WireError> {
        let start = self.pos;
        match f(self) {
            Ok(v) => Ok(v),
            Err(e) => {
                self.pos = start;
                Err(e)
            }
        }
    }

    pub fn read_varint_u64(&mut self) -> Result<u64, WireError> {
        self.with_rollback(|r| r.read_varint_u64_inner())
    }

    pub fn read_varint_u32(&mut self) -> Result<u32, WireError> {
        self.with_rollback(|r| Ok(r.read_varint_u64_inner()? as u32))
    }

    /// Signed 64-bit integers are carried as their raw bit pattern, sign
    /// extended from i32 when applicable, zig-zag is not used (§4.1).
    pub fn read_varint_i64(&mut self) -> Result<i64, WireError> {
        self.with_rollback(|r| Ok(r.read_varint_u64_inner()? as i64))
    }

    pub fn read_varint_i32(&mut self) -> Result<i32, WireError> {
        self.with_rollback(|r| Ok(r.read_varint_u64_inner()? as i64 as i32))
    }

    pub fn read_fixed64(&mut self) -> Result<[u8; 8], WireError> {
        self.with_rollback(|r| {
            let slice = r.peek_slice(8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(slice);
            r.pos += 8;
            Ok(buf)
        })
    }

    pub fn read_fixed32(&mut self) -> Result<[u8; 4], WireError> {
        self.with_rollback(|r| {
            let slice = r.peek_slice(4)?;
            let mut buf = [0u8; 4];
            buf.copy_from_slice(slice);
            r.pos += 4;
            Ok(buf)
        })
    }

    pub fn read_double(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_le_bytes(self.read_fixed64()?))
    }

    pub fn read_float(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_le_bytes(self.read_fixed32()?))
    }

    /// Reads a length-delimited region: a varint length followed by that
    /// many bytes.
    pub fn read_bytes(&mut self) -> Result<Bytes, WireError> {
        self.with_rollback(|r| {
            let len = r.read_varint_u64_inner()? as usize;
            let slice = r.peek_slice(len).map_err(|_| WireError::LengthOutOfBounds {
                len,
                remaining: r.remaining(),
            })?;
            let out = r.data.slice(r.pos..r.pos + slice.len());
            r.pos += len;
            Ok(out)
        })
    }

    /// A zero-length string decodes as the empty string, not null.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    /// Reads `len` bytes as a length-delimited sub-record and returns an
    /// independent sub-reader positioned over exactly those bytes. The
    /// outer reader advances past the region immediately.
    pub fn read_nested(&mut self, len: usize) -> Result<Reader, WireError> {
        self.with_rollback(|r| {
            let slice = r.peek_slice(len).map_err(|_| WireError::LengthOutOfBounds {
                len,
                remaining: r.remaining(),
            })?;
            let sub = r.data.slice(r.pos..r.pos + slice.len());
            r.pos += len;
            Ok(Reader::new(sub))
        })
    }

    /// Reads a length-delimited region (length prefix + payload) and returns
    /// a sub-reader over the payload, as used for the values sub-record of
    /// a sample (§4.3 step 4) and the rows region of a manifest (§4.2).
    pub fn read_nested_region(&mut self) -> Result<Reader, WireError> {
        self.with_rollback(|r| {
            let len = r.read_varint_u64_inner()? as usize;
            r.read_nested(len)
        })
    }

    /// Skips a field's value given its wire kind, without interpreting it.
    /// Used to ignore unrecognized fields (§3 "field numbers").
    pub fn skip_value(&mut self, kind: WireKind) -> Result<(), WireError> {
        match kind {
            WireKind::Varint | WireKind::Enum => {
                self.read_varint_u64()?;
            }
            WireKind::Fixed64 => {
                self.read_fixed64()?;
            }
            WireKind::Fixed32 => {
                self.read_fixed32()?;
            }
            WireKind::LengthDelimited | WireKind::Repeated => {
                self.read_bytes()?;
            }
        }
        Ok(())
    }
}

/// A growable writer, the symmetric encoder side of [`Reader`].
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: BytesMut::new() }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    fn write_varint_u64(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.put_u8(byte);
                break;
            } else {
                self.buf.put_u8(byte | 0x80);
            }
        }
    }

    pub fn write_tag(&mut self, field: u32, kind: WireKind) {
        let tag = ((field as u64) << 3) | (kind as u64);
        self.write_varint_u64(tag);
    }

    pub fn write_varint_u32(&mut self, value: u32) {
        self.write_varint_u64(value as u64);
    }

    pub fn write_varint_u64_value(&mut self, value: u64) {
        self.write_varint_u64(value);
    }

    /// Signed 32-bit integers are sign-extended to 64 bits before varint
    /// encoding (§4.1).
    pub fn write_varint_i32(&mut self, value: i32) {
        self.write_varint_u64(value as i64 as u64);
    }

    pub fn write_varint_i64(&mut self, value: i64) {
        self.write_varint_u64(value as u64);
    }

    pub fn write_fixed64(&mut self, bytes: [u8; 8]) {
        self.buf.put_slice(&bytes);
    }

    pub fn write_fixed32(&mut self, bytes: [u8; 4]) {
        self.buf.put_slice(&bytes);
    }

    pub fn write_double(&mut self, value: f64) {
        self.write_fixed64(value.to_le_bytes());
    }

    pub fn write_float(&mut self, value: f32) {
        self.write_fixed32(value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.write_varint_u64(data.len() as u64);
        self.buf.put_slice(data);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip_minimal_length() {
        for &(value, expected_len) in &[(0u64, 1), (127, 1), (128, 2), (16383, 2), (16384, 3)] {
            let mut w = Writer::new();
            w.write_varint_u64_value(value);
            assert_eq!(w.as_slice().len(), expected_len, "value {value}");

            let mut r = Reader::new(w.into_bytes());
            assert_eq!(r.read_varint_u64().unwrap(), value);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn tag_roundtrip() {
        let mut w = Writer::new();
        w.write_tag(3, WireKind::LengthDelimited);
        let mut r = Reader::new(w.into_bytes());
        assert_eq!(r.read_tag().unwrap(), (3, WireKind::LengthDelimited));
    }

    #[test]
    fn string_roundtrip_including_empty() {
        for s in ["", "hello", "utf8 \u{1F980}"] {
            let mut w = Writer::new();
            w.write_string(s);
            let mut r = Reader::new(w.into_bytes());
            assert_eq!(r.read_string().unwrap(), s);
        }
    }

    #[test]
    fn scalar_roundtrips() {
        let mut w = Writer::new();
        w.write_varint_i32(-5);
        w.write_varint_i64(-9_000_000_000);
        w.write_double(1.5);
        w.write_float(2.5);
        w.write_bytes(b"blob");

        let mut r = Reader::new(w.into_bytes());
        assert_eq!(r.read_varint_i32().unwrap(), -5);
        assert_eq!(r.read_varint_i64().unwrap(), -9_000_000_000);
        assert_eq!(r.read_double().unwrap(), 1.5);
        assert_eq!(r.read_float().unwrap(), 2.5);
        assert_eq!(&r.read_bytes().unwrap()[..], b"blob");
    }

    #[test]
    fn failed_read_leaves_position_unchanged() {
        let mut r = Reader::new(Bytes::from_static(&[0x80])); // truncated varint
        assert!(r.read_varint_u64().is_err());
        assert_eq!(r.remaining(), 1);

        let mut r = Reader::new(Bytes::new());
        assert!(r.read_fixed64().is_err());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn varint_too_long_rejected() {
        let data = vec![0x80; 11];
        let mut r = Reader::new(Bytes::from(data));
        assert_eq!(r.read_varint_u64(), Err(WireError::VarintTooLong));
    }

    #[test]
    fn skip_unknown_field_advances_by_exact_length() {
        let mut w = Writer::new();
        w.write_tag(9, WireKind::LengthDelimited);
        w.write_bytes(b"ignored payload");
        w.write_tag(1, WireKind::Varint);
        w.write_varint_u64_value(42);

        let mut r = Reader::new(w.into_bytes());
        let (field, kind) = r.read_tag().unwrap();
        assert_eq!(field, 9);
        r.skip_value(kind).unwrap();

        let (field, kind) = r.read_tag().unwrap();
        assert_eq!(field, 1);
        assert_eq!(kind, WireKind::Varint);
        assert_eq!(r.read_varint_u64().unwrap(), 42);
        assert!(r.is_empty());
    }

    #[test]
    fn nested_region_advances_outer_past_region() {
        let mut inner = Writer::new();
        inner.write_varint_u64_value(7);
        let inner_bytes = inner.into_bytes();

        let mut outer = Writer::new();
        outer.write_bytes(&inner_bytes);
        outer.write_varint_u64_value(99);

        let mut r = Reader::new(outer.into_bytes());
        let mut sub = r.read_nested_region().unwrap();
        assert_eq!(sub.read_varint_u64().unwrap(), 7);
        assert!(sub.is_empty());

        assert_eq!(r.read_varint_u64().unwrap(), 99);
    }
}
