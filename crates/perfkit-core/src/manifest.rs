//! Manifest decoding (§3 "Manifest", §4.2).
//!
//! A manifest is the schema descriptor for a source: a base timestamp, the
//! resolution relative sample deltas are expressed in, and an ordered list
//! of typed rows.

use crate::error::PerfkitError;
use crate::wire::{Reader, WireKind};
use std::fmt;
use tracing::{debug, warn};

/// Sample timestamps are relative to a manifest's `base_time`, in units of
/// this resolution (§3). The multiplier converts a delta to microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Usec,
    Msec,
    Sec,
    Min,
    Hour,
}

impl Resolution {
    fn from_wire(v: u32) -> Result<Self, PerfkitError> {
        Ok(match v {
            0 => Resolution::Usec,
            1 => Resolution::Msec,
            2 => Resolution::Sec,
            3 => Resolution::Min,
            4 => Resolution::Hour,
            other => {
                warn!(value = other, "unknown resolution enum value, rejecting manifest");
                return Err(PerfkitError::ProtocolError(format!(
                    "unknown resolution enum value {other}"
                )));
            }
        })
    }

    /// Microsecond multiplier, confirmed against the original source's
    /// `pk_sample_decode_timespec` table.
    pub fn multiplier(self) -> u64 {
        match self {
            Resolution::Usec => 1,
            Resolution::Msec => 1_000,
            Resolution::Sec => 1_000_000,
            Resolution::Min => 60_000_000,
            Resolution::Hour => 3_600_000_000,
        }
    }
}

/// The seven scalar types a manifest row may declare (§3 "Permitted type
/// codes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
    String,
}

impl TypeCode {
    fn from_wire(v: u32) -> Result<Self, PerfkitError> {
        Ok(match v {
            0 => TypeCode::Int32,
            1 => TypeCode::Uint32,
            2 => TypeCode::Int64,
            3 => TypeCode::Uint64,
            4 => TypeCode::Float,
            5 => TypeCode::Double,
            6 => TypeCode::String,
            other => {
                warn!(value = other, "unknown row type code, rejecting manifest");
                return Err(PerfkitError::ProtocolError(format!(
                    "unknown row type code {other}"
                )));
            }
        })
    }

    /// The wire kind a sample's value tag must carry for a row of this type
    /// (§4.3 step 4).
    pub fn expected_kind(self) -> WireKind {
        match self {
            TypeCode::Int32 | TypeCode::Uint32 | TypeCode::Int64 | TypeCode::Uint64 => {
                WireKind::Varint
            }
            TypeCode::Double => WireKind::Fixed64,
            TypeCode::Float => WireKind::Fixed32,
            TypeCode::String => WireKind::LengthDelimited,
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeCode::Int32 => "int32",
            TypeCode::Uint32 => "uint32",
            TypeCode::Int64 => "int64",
            TypeCode::Uint64 => "uint64",
            TypeCode::Float => "float",
            TypeCode::Double => "double",
            TypeCode::String => "string",
        };
        f.write_str(name)
    }
}

/// One manifest row: a 1-based id, its declared scalar type, and a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub row_id: u32,
    pub type_code: TypeCode,
    pub name: String,
}

/// The schema descriptor for a source (§3).
///
/// Immutable once constructed; replacing a source's manifest in the
/// resolver means inserting a new one, not mutating this one in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub base_time: u64,
    pub resolution: Resolution,
    pub source_id: u64,
    rows: Vec<Row>,
}

impl Manifest {
    /// Decodes a manifest from a length-delimited record per §4.2. Fields
    /// are read in the fixed order `base_time, resolution, source_id, rows`.
    pub fn decode(reader: &mut Reader) -> Result<Manifest, PerfkitError> {
        let (field, kind) = reader.read_tag()?;
        if field != 1 || kind != WireKind::Fixed64 {
            return Err(PerfkitError::ProtocolError(
                "manifest: expected base_time as field 1, fixed64".into(),
            ));
        }
        let base_time = u64::from_le_bytes(reader.read_fixed64()?);

        let (field, kind) = reader.read_tag()?;
        if field != 2 || kind != WireKind::Enum {
            return Err(PerfkitError::ProtocolError(
                "manifest: expected resolution as field 2, enum".into(),
            ));
        }
        let resolution = Resolution::from_wire(reader.read_varint_u32()?)?;

        let (field, kind) = reader.read_tag()?;
        if field != 3 || kind != WireKind::Varint {
            return Err(PerfkitError::ProtocolError(
                "manifest: expected source_id as field 3, varint".into(),
            ));
        }
        let source_id = reader.read_varint_u64()?;

        let (field, kind) = reader.read_tag()?;
        if field != 4 || kind != WireKind::Repeated {
            return Err(PerfkitError::ProtocolError(
                "manifest: expected rows region as field 4, repeated".into(),
            ));
        }
        let mut rows_region = reader.read_nested_region()?;

        let mut rows = Vec::new();
        while !rows_region.is_empty() {
            rows.push(Self::decode_row(&mut rows_region)?);
        }

        rows.sort_by_key(|r| r.row_id);
        for (i, row) in rows.iter().enumerate() {
            if row.row_id != (i + 1) as u32 {
                warn!(
                    source_id,
                    row_id = row.row_id,
                    position = i,
                    "manifest rows are not a contiguous 1..N prefix, rejecting"
                );
                return Err(PerfkitError::ProtocolError(format!(
                    "manifest rows are not a contiguous 1..{} prefix (row id {} at position {})",
                    rows.len(),
                    row.row_id,
                    i
                )));
            }
        }

        debug!(source_id, row_count = rows.len(), "manifest decoded");
        Ok(Manifest { base_time, resolution, source_id, rows })
    }

    fn decode_row(reader: &mut Reader) -> Result<Row, PerfkitError> {
        let (field, kind) = reader.read_tag()?;
        if field != 1 || kind != WireKind::Varint {
            return Err(PerfkitError::ProtocolError(
                "manifest row: expected row_id as field 1, varint".into(),
            ));
        }
        let row_id = reader.read_varint_u32()?;

        let (field, kind) = reader.read_tag()?;
        if field != 2 || kind != WireKind::Enum {
            return Err(PerfkitError::ProtocolError(
                "manifest row: expected type_code as field 2, enum".into(),
            ));
        }
        let type_code = TypeCode::from_wire(reader.read_varint_u32()?)?;

        let (field, kind) = reader.read_tag()?;
        if field != 3 || kind != WireKind::LengthDelimited {
            return Err(PerfkitError::ProtocolError(
                "manifest row: expected name as field 3, length-delimited".into(),
            ));
        }
        let name = reader.read_string()?;

        Ok(Row { row_id, type_code, name })
    }

    /// Rows in ascending `row_id` order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Looks up a row by its 1-based id.
    pub fn row(&self, row_id: u32) -> Option<&Row> {
        self.rows.get(row_id.checked_sub(1)? as usize)
    }

    /// Resolves a row id from its name, mirroring `pk_manifest_get_row_id`.
    pub fn row_id(&self, name: &str) -> Option<u32> {
        self.rows.iter().find(|r| r.name == name).map(|r| r.row_id)
    }

    pub fn resolution_multiplier(&self) -> u64 {
        self.resolution.multiplier()
    }
}
