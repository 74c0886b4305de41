//! Typed views over decoded manifest-list and manifest rows.
//!
//! The binary container format is decoded by an external [`BatchSource`];
//! the readers here only consume the resulting Arrow batches by column name
//! and convert them into [`Manifest`] and [`ManifestEntry`] records.
//! Avro maps are expected to surface as Arrow `Map` columns with `Int32`
//! field-id keys.
//!
//! [`BatchSource`]: crate::io::BatchSource

use std::collections::HashMap;

use arrow::array::{Array, ArrayRef, Int32Array, Int64Array, MapArray};
use arrow::record_batch::RecordBatch;

use crate::{Error, Result};

pub mod file;
pub mod list;

pub use file::ManifestFileReader;
pub use list::ManifestListReader;

/// Content kind of a whole manifest, from the manifest list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestContent {
    Data,
    Deletes,
}

/// Lifecycle status of one manifest entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    Existing,
    Added,
    Deleted,
}

impl EntryStatus {
    fn from_i32(value: i32, path: &str) -> Result<Self> {
        match value {
            0 => Ok(EntryStatus::Existing),
            1 => Ok(EntryStatus::Added),
            2 => Ok(EntryStatus::Deleted),
            other => Err(Error::integrity(
                path,
                format!("unknown manifest entry status {other}"),
            )),
        }
    }
}

/// Content kind of the file one manifest entry describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryContent {
    Data,
    PositionDeletes,
    EqualityDeletes,
}

impl EntryContent {
    fn from_i32(value: i32, path: &str) -> Result<Self> {
        match value {
            0 => Ok(EntryContent::Data),
            1 => Ok(EntryContent::PositionDeletes),
            2 => Ok(EntryContent::EqualityDeletes),
            other => Err(Error::integrity(
                path,
                format!("unknown manifest entry content {other}"),
            )),
        }
    }
}

/// Per-partition-field summary carried by a manifest-list entry. Bounds are
/// serialized in the transformed partition domain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSummary {
    /// `None` when the writer recorded nothing; absence is not "no nulls".
    pub contains_null: Option<bool>,
    pub contains_nan: Option<bool>,
    pub lower_bound: Option<Vec<u8>>,
    pub upper_bound: Option<Vec<u8>>,
}

/// One manifest-list entry: a manifest file plus the aggregates needed for
/// manifest-level pruning and cardinality estimation.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub path: String,
    pub content: ManifestContent,
    pub partition_spec_id: i32,
    pub sequence_number: i64,
    pub added_rows_count: i64,
    pub existing_rows_count: i64,
    pub deleted_rows_count: i64,
    /// `None` when the writer recorded no summaries; such a manifest is
    /// never pruned.
    pub field_summaries: Option<Vec<FieldSummary>>,
}

/// One decoded manifest entry (a data or delete file record).
///
/// All statistics maps are keyed by the column's field-id, never by schema
/// position. Bound values stay serialized; decoding needs the schema and is
/// done lazily at pruning time.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifestEntry {
    pub status: EntryStatus,
    pub content: EntryContent,
    pub file_path: String,
    pub file_format: String,
    pub record_count: i64,
    pub file_size_in_bytes: i64,
    pub lower_bounds: HashMap<i32, Vec<u8>>,
    pub upper_bounds: HashMap<i32, Vec<u8>>,
    pub value_counts: HashMap<i32, i64>,
    pub null_value_counts: HashMap<i32, i64>,
    pub nan_value_counts: HashMap<i32, i64>,
    pub bloom_filters: HashMap<i32, Vec<u8>>,
    pub equality_ids: Vec<i32>,
    /// Resolved sequence number, after inheritance from the owning manifest.
    pub sequence_number: i64,
    pub partition_spec_id: i32,
    pub partition: Vec<datafusion_common::ScalarValue>,
}

pub(crate) fn required_column<'a>(
    batch: &'a RecordBatch,
    path: &str,
    name: &str,
) -> Result<&'a ArrayRef> {
    batch.column_by_name(name).ok_or_else(|| {
        Error::integrity(path, format!("required manifest column '{name}' is missing"))
    })
}

pub(crate) fn downcast<'a, T: Array + 'static>(
    array: &'a dyn Array,
    path: &str,
    name: &str,
) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::integrity(
            path,
            format!(
                "manifest column '{name}' has unexpected type {}",
                array.data_type()
            ),
        )
    })
}

/// Decode one row of a field-id keyed map of serialized values.
pub(crate) fn blobs_at(map: &MapArray, row: usize, path: &str) -> Result<HashMap<i32, Vec<u8>>> {
    use arrow::array::BinaryArray;

    let mut out = HashMap::new();
    if map.is_null(row) {
        return Ok(out);
    }
    // MapArray::value yields the row's key/value entries as a struct slice.
    let entries = map.value(row);
    let keys: &Int32Array = downcast(entries.column(0).as_ref(), path, "map keys")?;
    let values: &BinaryArray = downcast(entries.column(1).as_ref(), path, "map values")?;
    for i in 0..entries.len() {
        if !values.is_null(i) {
            out.insert(keys.value(i), values.value(i).to_vec());
        }
    }
    Ok(out)
}

/// Decode one row of a field-id keyed map of counts.
pub(crate) fn counts_at(map: &MapArray, row: usize, path: &str) -> Result<HashMap<i32, i64>> {
    let mut out = HashMap::new();
    if map.is_null(row) {
        return Ok(out);
    }
    let entries = map.value(row);
    let keys: &Int32Array = downcast(entries.column(0).as_ref(), path, "map keys")?;
    let values: &Int64Array = downcast(entries.column(1).as_ref(), path, "map values")?;
    for i in 0..entries.len() {
        if !values.is_null(i) {
            out.insert(keys.value(i), values.value(i));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use arrow::array::{BinaryBuilder, Int32Builder, Int64Builder, MapBuilder};

    use super::*;

    #[test]
    fn field_id_blob_maps_decode_per_row() {
        let mut builder = MapBuilder::new(None, Int32Builder::new(), BinaryBuilder::new());
        builder.keys().append_value(1);
        builder.values().append_value(b"abc");
        builder.keys().append_value(7);
        builder.values().append_value(b"xy");
        builder.append(true).unwrap();
        builder.append(false).unwrap();
        let map = builder.finish();

        let decoded = blobs_at(&map, 0, "m.avro").unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.get(&1).map(Vec::as_slice), Some(&b"abc"[..]));
        assert_eq!(decoded.get(&7).map(Vec::as_slice), Some(&b"xy"[..]));
        // A null map row means the writer recorded nothing for the file.
        assert!(blobs_at(&map, 1, "m.avro").unwrap().is_empty());
    }

    #[test]
    fn field_id_count_maps_skip_null_values() {
        let mut builder = MapBuilder::new(None, Int32Builder::new(), Int64Builder::new());
        builder.keys().append_value(1);
        builder.values().append_value(3);
        builder.keys().append_value(2);
        builder.values().append_null();
        builder.append(true).unwrap();
        let map = builder.finish();

        let decoded = counts_at(&map, 0, "m.avro").unwrap();
        assert_eq!(decoded.get(&1), Some(&3));
        assert!(!decoded.contains_key(&2));
    }
}
