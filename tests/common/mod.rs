//! Shared fixtures: in-memory manifest sources and payload readers that
//! serve hand-built Arrow batches, plus builders for the batches themselves.

#![allow(dead_code)] // each test binary uses a subset

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::{
    Array, ArrayRef, BinaryBuilder, BooleanArray, Int32Array, Int32Builder, Int64Array,
    Int64Builder, ListArray, ListBuilder, MapBuilder, StringArray, StructArray,
};
use arrow::buffer::OffsetBuffer;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Fields};
use floe::{BatchSource, BatchSourceFactory, ManifestKind, PayloadReader, Result};

// ============================================================================
// Collaborator doubles
// ============================================================================

struct VecSource {
    batches: Vec<RecordBatch>,
}

impl BatchSource for VecSource {
    fn finished(&self) -> bool {
        self.batches.is_empty()
    }

    fn next_batch(&mut self, _max_rows: usize) -> Result<Option<RecordBatch>> {
        Ok(if self.batches.is_empty() {
            None
        } else {
            Some(self.batches.remove(0))
        })
    }
}

/// Serves pre-built batches per path and counts how often each manifest is
/// opened, which is what the lazy-expansion assertions key on.
pub struct StaticSources {
    batches: Mutex<HashMap<String, Vec<RecordBatch>>>,
    pub manifest_opens: AtomicUsize,
    pub opened_paths: Mutex<Vec<String>>,
}

impl StaticSources {
    pub fn new(batches: HashMap<String, Vec<RecordBatch>>) -> Self {
        StaticSources {
            batches: Mutex::new(batches),
            manifest_opens: AtomicUsize::new(0),
            opened_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn manifest_opens(&self) -> usize {
        self.manifest_opens.load(Ordering::SeqCst)
    }
}

impl BatchSourceFactory for StaticSources {
    fn open(&self, path: &str, kind: ManifestKind) -> Result<Box<dyn BatchSource + Send>> {
        if kind == ManifestKind::Manifest {
            self.manifest_opens.fetch_add(1, Ordering::SeqCst);
        }
        self.opened_paths.lock().unwrap().push(path.to_string());
        let batches = self
            .batches
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| panic!("no batches registered for '{path}'"));
        Ok(Box::new(VecSource { batches }))
    }
}

/// In-memory delete-file payloads, keyed by path.
pub struct StaticPayload {
    batches: HashMap<String, Vec<RecordBatch>>,
}

impl StaticPayload {
    pub fn new(batches: HashMap<String, Vec<RecordBatch>>) -> Self {
        StaticPayload { batches }
    }

    pub fn empty() -> Self {
        StaticPayload {
            batches: HashMap::new(),
        }
    }
}

impl PayloadReader for StaticPayload {
    fn read(
        &self,
        path: &str,
        _projection: Option<&[String]>,
    ) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>> {
        let batches = self
            .batches
            .get(path)
            .cloned()
            .unwrap_or_else(|| panic!("no payload registered for '{path}'"));
        Ok(Box::new(batches.into_iter().map(Ok)))
    }
}

// ============================================================================
// Table metadata
// ============================================================================

pub const MANIFEST_LIST: &str = "s3://warehouse/t/metadata/snap-1.avro";

/// v2 metadata: columns `id` (long, field 1) and `category` (string,
/// field 2), identity-partitioned by `category`.
pub fn v2_metadata() -> String {
    metadata_json(2)
}

pub fn v1_metadata() -> String {
    metadata_json(1)
}

fn metadata_json(format_version: u8) -> String {
    format!(
        r#"{{
        "format-version": {format_version},
        "location": "s3://warehouse/t",
        "current-schema-id": 0,
        "schemas": [
            {{"type": "struct", "schema-id": 0, "fields": [
                {{"id": 1, "name": "id", "required": true, "type": "long"}},
                {{"id": 2, "name": "category", "required": false, "type": "string"}}
            ]}}
        ],
        "partition-specs": [
            {{"spec-id": 0, "fields": [
                {{"source-id": 2, "field-id": 1000, "name": "category", "transform": "identity"}}
            ]}}
        ],
        "default-spec-id": 0,
        "current-snapshot-id": 10,
        "snapshots": [
            {{"snapshot-id": 10, "sequence-number": 7, "timestamp-ms": 1000,
              "manifest-list": "{MANIFEST_LIST}", "schema-id": 0}}
        ]
    }}"#
    )
}

// ============================================================================
// Manifest-list batches
// ============================================================================

pub struct ManifestRow {
    pub path: &'static str,
    pub content: i32,
    pub sequence: i64,
    pub added_rows: i64,
    pub existing_rows: i64,
    /// Identity-transformed bounds of the `category` partition field.
    pub category_summary: Option<(&'static str, &'static str)>,
}

impl ManifestRow {
    pub fn data(path: &'static str, sequence: i64) -> Self {
        ManifestRow {
            path,
            content: 0,
            sequence,
            added_rows: 100,
            existing_rows: 0,
            category_summary: None,
        }
    }

    pub fn deletes(path: &'static str, sequence: i64) -> Self {
        ManifestRow {
            content: 1,
            ..Self::data(path, sequence)
        }
    }
}

pub fn manifest_list_batch(rows: &[ManifestRow]) -> RecordBatch {
    let mut columns: Vec<(&str, ArrayRef)> = vec![
        (
            "manifest_path",
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.path))),
        ),
        (
            "partition_spec_id",
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|_| 0))),
        ),
        (
            "content",
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.content))),
        ),
        (
            "sequence_number",
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.sequence))),
        ),
        (
            "added_rows_count",
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.added_rows))),
        ),
        (
            "existing_rows_count",
            Arc::new(Int64Array::from_iter_values(
                rows.iter().map(|r| r.existing_rows),
            )),
        ),
    ];

    if rows.iter().any(|r| r.category_summary.is_some()) {
        columns.push(("partitions", Arc::new(summaries_column(rows))));
    }

    RecordBatch::try_from_iter(
        columns
            .into_iter()
            .map(|(name, array)| (name.to_string(), array)),
    )
    .unwrap()
}

fn summaries_column(rows: &[ManifestRow]) -> ListArray {
    let summary_fields = Fields::from(vec![
        Field::new("contains_null", DataType::Boolean, false),
        Field::new("contains_nan", DataType::Boolean, true),
        Field::new("lower_bound", DataType::Binary, true),
        Field::new("upper_bound", DataType::Binary, true),
    ]);

    let mut contains_null = Vec::new();
    let mut lower = BinaryBuilder::new();
    let mut upper = BinaryBuilder::new();
    let mut offsets = vec![0i32];
    for row in rows {
        match row.category_summary {
            Some((low, high)) => {
                contains_null.push(false);
                lower.append_value(low.as_bytes());
                upper.append_value(high.as_bytes());
                offsets.push(offsets.last().unwrap() + 1);
            }
            None => {
                // One summary per partition field, with no bounds recorded.
                contains_null.push(false);
                lower.append_null();
                upper.append_null();
                offsets.push(offsets.last().unwrap() + 1);
            }
        }
    }
    let count = contains_null.len();
    let values = StructArray::new(
        summary_fields.clone(),
        vec![
            Arc::new(BooleanArray::from(contains_null)),
            Arc::new(BooleanArray::from(vec![Some(false); count])),
            Arc::new(lower.finish()),
            Arc::new(upper.finish()),
        ],
        None,
    );
    ListArray::new(
        Arc::new(Field::new(
            "item",
            DataType::Struct(summary_fields),
            true,
        )),
        OffsetBuffer::new(offsets.into()),
        Arc::new(values),
        None,
    )
}

// ============================================================================
// Manifest-entry batches
// ============================================================================

pub struct EntryRow {
    pub status: i32,
    pub content: i32,
    pub path: &'static str,
    pub format: &'static str,
    pub sequence: Option<i64>,
    /// Lower/upper bound blobs for the `id` column (field 1).
    pub id_bounds: Option<(i64, i64)>,
    /// Null count recorded for the `category` column (field 2), if any.
    pub category_null_count: Option<i64>,
    pub equality_ids: Vec<i32>,
}

impl EntryRow {
    pub fn data(path: &'static str) -> Self {
        EntryRow {
            status: 1,
            content: 0,
            path,
            format: "parquet",
            sequence: None,
            id_bounds: None,
            category_null_count: None,
            equality_ids: Vec::new(),
        }
    }

    pub fn with_id_bounds(mut self, lower: i64, upper: i64) -> Self {
        self.id_bounds = Some((lower, upper));
        self
    }

    pub fn with_category_null_count(mut self, count: i64) -> Self {
        self.category_null_count = Some(count);
        self
    }

    pub fn positional_deletes(path: &'static str, sequence: i64) -> Self {
        EntryRow {
            content: 1,
            sequence: Some(sequence),
            ..Self::data(path)
        }
    }

    pub fn equality_deletes(path: &'static str, sequence: i64, equality_ids: Vec<i32>) -> Self {
        EntryRow {
            content: 2,
            sequence: Some(sequence),
            equality_ids,
            ..Self::data(path)
        }
    }
}

pub fn entry_batch(rows: &[EntryRow]) -> RecordBatch {
    let lower_bounds = bounds_map(rows, |r| r.id_bounds.map(|(low, _)| low));
    let upper_bounds = bounds_map(rows, |r| r.id_bounds.map(|(_, high)| high));
    let null_counts = counts_map(rows);
    let equality_ids = equality_ids_column(rows);

    let data_file = StructArray::from(vec![
        (
            Arc::new(Field::new("content", DataType::Int32, false)),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.content))) as ArrayRef,
        ),
        (
            Arc::new(Field::new("file_path", DataType::Utf8, false)),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.path))) as ArrayRef,
        ),
        (
            Arc::new(Field::new("file_format", DataType::Utf8, false)),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.format))) as ArrayRef,
        ),
        (
            Arc::new(Field::new("record_count", DataType::Int64, false)),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|_| 100))) as ArrayRef,
        ),
        (
            Arc::new(Field::new("file_size_in_bytes", DataType::Int64, false)),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|_| 4096))) as ArrayRef,
        ),
        (
            Arc::new(Field::new(
                "lower_bounds",
                lower_bounds.data_type().clone(),
                true,
            )),
            Arc::new(lower_bounds) as ArrayRef,
        ),
        (
            Arc::new(Field::new(
                "upper_bounds",
                upper_bounds.data_type().clone(),
                true,
            )),
            Arc::new(upper_bounds) as ArrayRef,
        ),
        (
            Arc::new(Field::new(
                "null_value_counts",
                null_counts.data_type().clone(),
                true,
            )),
            Arc::new(null_counts) as ArrayRef,
        ),
        (
            Arc::new(Field::new(
                "equality_ids",
                equality_ids.data_type().clone(),
                true,
            )),
            Arc::new(equality_ids) as ArrayRef,
        ),
    ]);

    RecordBatch::try_from_iter(vec![
        (
            "status".to_string(),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.status))) as ArrayRef,
        ),
        (
            "sequence_number".to_string(),
            Arc::new(Int64Array::from_iter(rows.iter().map(|r| r.sequence))) as ArrayRef,
        ),
        ("data_file".to_string(), Arc::new(data_file) as ArrayRef),
    ])
    .unwrap()
}

fn bounds_map(
    rows: &[EntryRow],
    bound: impl Fn(&EntryRow) -> Option<i64>,
) -> arrow::array::MapArray {
    let mut builder = MapBuilder::new(None, Int32Builder::new(), BinaryBuilder::new());
    for row in rows {
        match bound(row) {
            Some(value) => {
                builder.keys().append_value(1);
                builder.values().append_value(value.to_le_bytes());
                builder.append(true).unwrap();
            }
            None => builder.append(false).unwrap(),
        }
    }
    builder.finish()
}

fn counts_map(rows: &[EntryRow]) -> arrow::array::MapArray {
    let mut builder = MapBuilder::new(None, Int32Builder::new(), Int64Builder::new());
    for row in rows {
        let mut recorded = false;
        if row.id_bounds.is_some() {
            builder.keys().append_value(1);
            builder.values().append_value(0);
            recorded = true;
        }
        if let Some(count) = row.category_null_count {
            builder.keys().append_value(2);
            builder.values().append_value(count);
            recorded = true;
        }
        builder.append(recorded).unwrap();
    }
    builder.finish()
}

fn equality_ids_column(rows: &[EntryRow]) -> ListArray {
    let mut builder = ListBuilder::new(Int32Builder::new());
    for row in rows {
        if row.equality_ids.is_empty() {
            builder.append_null();
        } else {
            for id in &row.equality_ids {
                builder.values().append_value(*id);
            }
            builder.append(true);
        }
    }
    builder.finish()
}

// ============================================================================
// Delete payload batches
// ============================================================================

pub fn positional_delete_batch(rows: &[(&str, i64)]) -> RecordBatch {
    RecordBatch::try_from_iter(vec![
        (
            "file_path".to_string(),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))) as ArrayRef,
        ),
        (
            "pos".to_string(),
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))) as ArrayRef,
        ),
    ])
    .unwrap()
}

pub fn equality_delete_batch(ids: &[i64]) -> RecordBatch {
    RecordBatch::try_from_iter(vec![(
        "id".to_string(),
        Arc::new(Int64Array::from_iter_values(ids.iter().copied())) as ArrayRef,
    )])
    .unwrap()
}
