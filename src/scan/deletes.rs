//! Accumulation and lookup of positional and equality deletes.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use arrow::array::{Array, Int64Array, StringArray};
use datafusion_common::ScalarValue;
use roaring::RoaringTreemap;

use crate::expr::{CmpOp, ColumnFilter, FilterSet};
use crate::io::PayloadReader;
use crate::manifest::ManifestEntry;
use crate::spec::{FieldIndex, Schema};
use crate::{Error, Result};

const POSITIONAL_FILE_PATH: &str = "file_path";
const POSITIONAL_POS: &str = "pos";

/// One scanned equality-delete file: the predicates surviving rows must
/// satisfy, plus the partition tuple it was written under.
#[derive(Clone, Debug)]
pub struct EqualityDelete {
    pub partition: Vec<ScalarValue>,
    pub partition_spec_id: i32,
    /// Per-row conjunctions keyed by global output-column ordinal: rows
    /// survive only if, for every delete row, at least one column differs.
    pub filters: Vec<FilterSet>,
}

/// Collects deletes while manifests stream by, queryable per data file.
///
/// Positional and equality deletes live in separate structures because their
/// applicability keys differ: positional deletes target one concrete file
/// path, equality deletes apply to every data file with a strictly smaller
/// sequence number.
#[derive(Debug, Default)]
pub struct DeleteStore {
    positional: HashMap<String, RoaringTreemap>,
    equality: BTreeMap<i64, Vec<EqualityDelete>>,
}

impl DeleteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.equality.is_empty()
    }

    /// Take ownership of the positional deletes targeting `path`.
    ///
    /// One-shot transfer: the first call returns the accumulated set, every
    /// later call for the same path returns `None`. Delete data is consumed
    /// exactly once per data file within a scan.
    pub fn take_positional(&mut self, path: &str) -> Option<RoaringTreemap> {
        self.positional.remove(path)
    }

    /// Equality deletes applicable to a data file at `data_sequence`: only
    /// deletes with a strictly greater sequence number, so earlier deletes
    /// never hide later inserts of the same key.
    pub fn equality_deletes_for(
        &self,
        data_sequence: i64,
    ) -> impl Iterator<Item = &EqualityDelete> {
        self.equality
            .range((Bound::Excluded(data_sequence), Bound::Unbounded))
            .flat_map(|(_, deletes)| deletes.iter())
    }

    /// Materialize a POSITION_DELETES file into the per-path row sets.
    pub(crate) fn scan_positional(
        &mut self,
        reader: &dyn PayloadReader,
        entry: &ManifestEntry,
        resolved_path: &str,
    ) -> Result<()> {
        require_parquet(entry)?;
        let projection = [POSITIONAL_FILE_PATH.to_string(), POSITIONAL_POS.to_string()];
        for batch in reader.read(resolved_path, Some(&projection))? {
            let batch = batch?;
            let paths: &StringArray = column(&batch, resolved_path, POSITIONAL_FILE_PATH)?;
            let positions: &Int64Array = column(&batch, resolved_path, POSITIONAL_POS)?;

            // Delete files are conventionally sorted by path, so consecutive
            // rows are buffered per run and merged on a path change. Unsorted
            // input still lands correctly, it just merges more often.
            let mut run_path: Option<String> = None;
            let mut run_rows = RoaringTreemap::new();
            for row in 0..batch.num_rows() {
                let path = paths.value(row);
                if run_path.as_deref() != Some(path) {
                    if let Some(prev) = run_path.take() {
                        *self.positional.entry(prev).or_default() |=
                            std::mem::take(&mut run_rows);
                    }
                    run_path = Some(path.to_string());
                }
                run_rows.insert(positions.value(row) as u64);
            }
            if let Some(prev) = run_path.take() {
                *self.positional.entry(prev).or_default() |= std::mem::take(&mut run_rows);
            }
        }
        Ok(())
    }

    /// Materialize an EQUALITY_DELETES file into sequence-keyed predicate
    /// sets. Predicates are built against the global output schema's column
    /// ordinals via the field-id index.
    pub(crate) fn scan_equality(
        &mut self,
        reader: &dyn PayloadReader,
        entry: &ManifestEntry,
        resolved_path: &str,
        schema: &Schema,
        field_index: &FieldIndex,
    ) -> Result<()> {
        require_parquet(entry)?;

        let mut columns = Vec::with_capacity(entry.equality_ids.len());
        for field_id in &entry.equality_ids {
            let column = schema.column_by_field_id(*field_id).ok_or_else(|| {
                Error::integrity(
                    resolved_path,
                    format!("equality delete references unknown field id {field_id}"),
                )
            })?;
            let ordinal = field_index.ordinal(*field_id).ok_or_else(|| {
                Error::integrity(
                    resolved_path,
                    format!("field id {field_id} is missing from the field index"),
                )
            })?;
            columns.push((column.name.clone(), ordinal));
        }
        let projection: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();

        let mut filters = Vec::new();
        for batch in reader.read(resolved_path, Some(&projection))? {
            let batch = batch?;
            for row in 0..batch.num_rows() {
                let mut row_filters = FilterSet::new();
                for (name, ordinal) in &columns {
                    let array = batch.column_by_name(name).ok_or_else(|| {
                        Error::integrity(
                            resolved_path,
                            format!("equality delete file lacks column '{name}'"),
                        )
                    })?;
                    let filter = if array.is_null(row) {
                        // A null delete value removes null rows; survivors
                        // must be non-null.
                        ColumnFilter::IsNull { negated: true }
                    } else {
                        let value = ScalarValue::try_from_array(array.as_ref(), row)
                            .map_err(|e| {
                                Error::integrity(
                                    resolved_path,
                                    format!("undecodable equality delete value: {e}"),
                                )
                            })?;
                        ColumnFilter::Comparison {
                            op: CmpOp::NotEq,
                            value,
                        }
                    };
                    row_filters.push(*ordinal, filter);
                }
                filters.push(row_filters);
            }
        }

        self.equality
            .entry(entry.sequence_number)
            .or_default()
            .push(EqualityDelete {
                partition: entry.partition.clone(),
                partition_spec_id: entry.partition_spec_id,
                filters,
            });
        Ok(())
    }
}

fn require_parquet(entry: &ManifestEntry) -> Result<()> {
    if entry.file_format.eq_ignore_ascii_case("parquet") {
        Ok(())
    } else {
        Err(Error::not_implemented(format!(
            "delete file '{}' has format '{}', only parquet is supported",
            entry.file_path, entry.file_format
        )))
    }
}

fn column<'a, T: Array + 'static>(
    batch: &'a arrow::record_batch::RecordBatch,
    path: &str,
    name: &str,
) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| {
            Error::integrity(
                path,
                format!("positional delete file lacks a usable '{name}' column"),
            )
        })
}
