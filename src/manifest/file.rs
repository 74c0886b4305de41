//! Reader for individual manifest files (data/delete file records).

use std::collections::HashMap;

use arrow::array::{Array, Int32Array, Int64Array, ListArray, MapArray, StringArray, StructArray};
use arrow::record_batch::RecordBatch;
use datafusion_common::ScalarValue;

use super::{
    blobs_at, counts_at, downcast, required_column, EntryContent, EntryStatus, ManifestEntry,
};
use crate::io::BatchSource;
use crate::spec::FormatVersion;
use crate::{Error, Result};

const BATCH_ROWS: usize = 2048;

/// Streams [`ManifestEntry`] records out of one manifest at a time.
///
/// Reused across manifests: `initialize` binds a fresh batch source and
/// resets the decode offset; the caller sets the owning manifest's sequence
/// number and partition-spec id before reading, since both flow into every
/// decoded entry.
pub struct ManifestFileReader {
    format_version: FormatVersion,
    skip_deleted: bool,
    sequence_number: i64,
    partition_spec_id: i32,
    source: Option<Box<dyn BatchSource + Send>>,
    batch: Option<RecordBatch>,
    offset: usize,
    done: bool,
    path: String,
}

impl ManifestFileReader {
    /// `skip_deleted` drops DELETED-status entries during decode; they
    /// describe files removed from the table and must never reach the
    /// planner.
    pub fn new(format_version: FormatVersion, skip_deleted: bool) -> Self {
        Self {
            format_version,
            skip_deleted,
            sequence_number: 0,
            partition_spec_id: 0,
            source: None,
            batch: None,
            offset: 0,
            done: false,
            path: String::new(),
        }
    }

    pub fn initialize(&mut self, source: Box<dyn BatchSource + Send>, path: impl Into<String>) {
        self.source = Some(source);
        self.batch = None;
        self.offset = 0;
        self.done = false;
        self.path = path.into();
    }

    pub fn set_sequence_number(&mut self, sequence_number: i64) {
        self.sequence_number = sequence_number;
    }

    pub fn set_partition_spec_id(&mut self, partition_spec_id: i32) {
        self.partition_spec_id = partition_spec_id;
    }

    pub fn finished(&self) -> bool {
        self.done || self.source.is_none()
    }

    /// Consume up to `count` manifest rows, appending the decoded entries to
    /// `out`. Returns the number of entries produced, which is smaller than
    /// the number of rows consumed when deleted entries are skipped.
    pub fn read(&mut self, count: usize, out: &mut Vec<ManifestEntry>) -> Result<usize> {
        let mut consumed = 0;
        let mut produced = 0;
        while consumed < count && !self.finished() {
            if self.batch_exhausted() {
                if !self.pull_batch()? {
                    break;
                }
            }
            let batch = self.batch.clone().expect("pull_batch produced a batch");
            let take = (count - consumed).min(batch.num_rows() - self.offset);
            produced += self.decode_rows(&batch, self.offset, take, out)?;
            self.offset += take;
            consumed += take;
        }
        Ok(produced)
    }

    fn batch_exhausted(&self) -> bool {
        match &self.batch {
            Some(batch) => self.offset >= batch.num_rows(),
            None => true,
        }
    }

    fn pull_batch(&mut self) -> Result<bool> {
        let source = self.source.as_mut().expect("reader is initialized");
        loop {
            if source.finished() {
                self.done = true;
                return Ok(false);
            }
            match source.next_batch(BATCH_ROWS)? {
                Some(batch) if batch.num_rows() > 0 => {
                    self.batch = Some(batch);
                    self.offset = 0;
                    return Ok(true);
                }
                Some(_) => continue,
                None => {
                    self.done = true;
                    return Ok(false);
                }
            }
        }
    }

    fn decode_rows(
        &self,
        batch: &RecordBatch,
        offset: usize,
        count: usize,
        out: &mut Vec<ManifestEntry>,
    ) -> Result<usize> {
        let path = &self.path;
        let status: &Int32Array =
            downcast(required_column(batch, path, "status")?.as_ref(), path, "status")?;
        let data_file = required_column(batch, path, "data_file")?;
        let Some(data_file) = data_file.as_any().downcast_ref::<StructArray>() else {
            return Err(Error::integrity(
                path,
                "the 'data_file' column of a manifest must be a struct",
            ));
        };

        let v2 = self.format_version >= FormatVersion::V2;
        let stored_sequence = if v2 {
            match batch.column_by_name("sequence_number") {
                Some(column) => Some(downcast::<Int64Array>(column.as_ref(), path, "sequence_number")?),
                None => None,
            }
        } else {
            None
        };

        let file_path: &StringArray = downcast(
            struct_child(data_file, path, "file_path")?.as_ref(),
            path,
            "file_path",
        )?;
        let file_format: &StringArray = downcast(
            struct_child(data_file, path, "file_format")?.as_ref(),
            path,
            "file_format",
        )?;
        let record_count: &Int64Array = downcast(
            struct_child(data_file, path, "record_count")?.as_ref(),
            path,
            "record_count",
        )?;
        let file_size: &Int64Array = downcast(
            struct_child(data_file, path, "file_size_in_bytes")?.as_ref(),
            path,
            "file_size_in_bytes",
        )?;
        let content = if v2 {
            Some(downcast::<Int32Array>(
                struct_child(data_file, path, "content")?.as_ref(),
                path,
                "content",
            )?)
        } else {
            None
        };

        let lower_bounds = optional_map(data_file, path, "lower_bounds")?;
        let upper_bounds = optional_map(data_file, path, "upper_bounds")?;
        let value_counts = optional_map(data_file, path, "value_counts")?;
        let null_counts = optional_map(data_file, path, "null_value_counts")?;
        let nan_counts = optional_map(data_file, path, "nan_value_counts")?;
        let bloom_filters = optional_map(data_file, path, "bloom_filters")?;
        let equality_ids = match data_file.column_by_name("equality_ids") {
            Some(column) if v2 => Some(downcast::<ListArray>(column.as_ref(), path, "equality_ids")?),
            _ => None,
        };
        let partition = data_file
            .column_by_name("partition")
            .and_then(|c| c.as_any().downcast_ref::<StructArray>());

        let mut produced = 0;
        for row in offset..offset + count {
            let entry_status = EntryStatus::from_i32(status.value(row), path)?;
            if self.skip_deleted && entry_status == EntryStatus::Deleted {
                continue;
            }

            let entry_content = match content {
                Some(content) => EntryContent::from_i32(content.value(row), path)?,
                None => EntryContent::Data,
            };
            let sequence_number =
                self.resolve_sequence(stored_sequence, row, entry_status)?;

            out.push(ManifestEntry {
                status: entry_status,
                content: entry_content,
                file_path: file_path.value(row).to_string(),
                file_format: file_format.value(row).to_string(),
                record_count: record_count.value(row),
                file_size_in_bytes: file_size.value(row),
                lower_bounds: map_or_empty(lower_bounds, row, path, blobs_at)?,
                upper_bounds: map_or_empty(upper_bounds, row, path, blobs_at)?,
                value_counts: map_or_empty(value_counts, row, path, counts_at)?,
                null_value_counts: map_or_empty(null_counts, row, path, counts_at)?,
                nan_value_counts: map_or_empty(nan_counts, row, path, counts_at)?,
                bloom_filters: map_or_empty(bloom_filters, row, path, blobs_at)?,
                equality_ids: decode_equality_ids(equality_ids, row, path)?,
                sequence_number,
                partition_spec_id: self.partition_spec_id,
                partition: decode_partition(partition, row, path)?,
            });
            produced += 1;
        }
        Ok(produced)
    }

    /// Two-phase sequence resolution: take the stored value when present,
    /// otherwise inherit from the owning manifest. Inheritance is only legal
    /// for ADDED entries; a missing value elsewhere is malformed input.
    fn resolve_sequence(
        &self,
        stored: Option<&Int64Array>,
        row: usize,
        status: EntryStatus,
    ) -> Result<i64> {
        let Some(stored) = stored else {
            // No column at all: the manifest list defaulted to 0 as well.
            debug_assert_eq!(self.sequence_number, 0);
            return Ok(self.sequence_number);
        };
        if !stored.is_null(row) {
            return Ok(stored.value(row));
        }
        if status == EntryStatus::Added {
            Ok(self.sequence_number)
        } else {
            debug_assert!(false, "sequence number missing for a non-added entry");
            Err(Error::integrity(
                &self.path,
                format!("{status:?} manifest entry carries no sequence number"),
            ))
        }
    }
}

fn struct_child<'a>(
    data_file: &'a StructArray,
    path: &str,
    name: &str,
) -> Result<&'a arrow::array::ArrayRef> {
    data_file.column_by_name(name).ok_or_else(|| {
        Error::integrity(
            path,
            format!("required 'data_file' field '{name}' is missing"),
        )
    })
}

fn optional_map<'a>(
    data_file: &'a StructArray,
    path: &str,
    name: &str,
) -> Result<Option<&'a MapArray>> {
    match data_file.column_by_name(name) {
        Some(column) => Ok(Some(downcast(column.as_ref(), path, name)?)),
        None => Ok(None),
    }
}

fn map_or_empty<T>(
    map: Option<&MapArray>,
    row: usize,
    path: &str,
    decode: impl Fn(&MapArray, usize, &str) -> Result<HashMap<i32, T>>,
) -> Result<HashMap<i32, T>> {
    match map {
        Some(map) => decode(map, row, path),
        None => Ok(HashMap::new()),
    }
}

fn decode_equality_ids(list: Option<&ListArray>, row: usize, path: &str) -> Result<Vec<i32>> {
    let Some(list) = list else {
        return Ok(Vec::new());
    };
    if list.is_null(row) {
        return Ok(Vec::new());
    }
    let values = list.value(row);
    let values: &Int32Array = downcast(values.as_ref(), path, "equality_ids values")?;
    Ok(values.iter().flatten().collect())
}

fn decode_partition(
    partition: Option<&StructArray>,
    row: usize,
    path: &str,
) -> Result<Vec<ScalarValue>> {
    let Some(partition) = partition else {
        return Ok(Vec::new());
    };
    let mut values = Vec::with_capacity(partition.num_columns());
    for column in partition.columns() {
        let value = ScalarValue::try_from_array(column.as_ref(), row)
            .map_err(|e| Error::integrity(path, format!("undecodable partition value: {e}")))?;
        values.push(value);
    }
    Ok(values)
}
