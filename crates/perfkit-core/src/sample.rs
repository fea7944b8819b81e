//! Sample decoding (§3 "Sample", §4.3).

use crate::error::PerfkitError;
use crate::manifest::{Manifest, TypeCode};
use crate::resolver::Resolver;
use crate::wire::{Reader, WireKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// A single row value, tagged by the manifest's declared type for that row
/// (§9 "runtime-typed value cells").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Float(f32),
    Double(f64),
    String(String),
    /// The row is declared in the manifest but absent from this sample.
    Unset,
}

/// A single timestamped row-tuple decoded against a resolved [`Manifest`]
/// (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub source_id: u64,
    pub delta: u64,
    pub absolute_time: u64,
    values: HashMap<u32, Value>,
}

impl Sample {
    pub fn value(&self, row_id: u32) -> Option<&Value> {
        self.values.get(&row_id)
    }

    pub fn values(&self) -> &HashMap<u32, Value> {
        &self.values
    }

    /// Decodes a sample per §4.3, resolving its governing manifest via
    /// `resolver`.
    pub fn decode(reader: &mut Reader, resolver: &Resolver) -> Result<Sample, PerfkitError> {
        let (field, kind) = reader.read_tag()?;
        if field != 1 || kind != WireKind::Varint {
            return Err(PerfkitError::ProtocolError(
                "sample: expected source_id as field 1, varint".into(),
            ));
        }
        let source_id = reader.read_varint_u64()?;

        let manifest = resolver.lookup(source_id).ok_or_else(|| {
            warn!(source_id, "sample references a source with no resolved manifest");
            PerfkitError::UnknownSource { source_id }
        })?;

        let (field, kind) = reader.read_tag()?;
        if field != 2 || kind != WireKind::Varint {
            return Err(PerfkitError::ProtocolError(
                "sample: expected delta as field 2, varint".into(),
            ));
        }
        let delta = reader.read_varint_u64()?;
        let absolute_time = Self::absolute_time(&manifest, delta)?;

        let (field, kind) = reader.read_tag()?;
        if field != 3 || kind != WireKind::LengthDelimited {
            return Err(PerfkitError::ProtocolError(
                "sample: expected values region as field 3, length-delimited".into(),
            ));
        }
        let mut values_region = reader.read_nested_region()?;

        let mut values: HashMap<u32, Value> = manifest
            .rows()
            .iter()
            .map(|row| (row.row_id, Value::Unset))
            .collect();

        while !values_region.is_empty() {
            let (row_id, kind) = values_region.read_tag()?;
            let row = manifest
                .row(row_id)
                .ok_or(PerfkitError::ProtocolError(format!(
                    "sample: row {row_id} not present in manifest for source {source_id}"
                )))?;

            let expected = row.type_code.expected_kind();
            if kind != expected {
                warn!(
                    source_id,
                    row_id,
                    expected = expected.name(),
                    found = kind.name(),
                    "sample field wire kind does not match manifest row type"
                );
                return Err(PerfkitError::TypeMismatch {
                    row_id,
                    expected: expected.name(),
                    found: kind.name(),
                });
            }

            let value = match row.type_code {
                TypeCode::Int32 => Value::Int32(values_region.read_varint_i32()?),
                TypeCode::Uint32 => Value::Uint32(values_region.read_varint_u32()?),
                TypeCode::Int64 => Value::Int64(values_region.read_varint_i64()?),
                TypeCode::Uint64 => Value::Uint64(values_region.read_varint_u64()?),
                TypeCode::Float => Value::Float(values_region.read_float()?),
                TypeCode::Double => Value::Double(values_region.read_double()?),
                TypeCode::String => Value::String(values_region.read_string()?),
            };

            // Last-write-wins on duplicate row ids within one sample (§4.3
            // edge cases).
            values.insert(row_id, value);
        }

        trace!(source_id, delta, absolute_time, "sample decoded");
        Ok(Sample { source_id, delta, absolute_time, values })
    }

    fn absolute_time(manifest: &Arc<Manifest>, delta: u64) -> Result<u64, PerfkitError> {
        let offset = delta
            .checked_mul(manifest.resolution_multiplier())
            .ok_or_else(|| {
                PerfkitError::ProtocolError(format!(
                    "sample delta {delta} overflows microseconds at resolution {:?}",
                    manifest.resolution
                ))
            })?;
        manifest.base_time.checked_add(offset).ok_or_else(|| {
            PerfkitError::ProtocolError(format!(
                "sample absolute time overflows 64-bit microseconds for source {}",
                manifest.source_id
            ))
        })
    }
}
