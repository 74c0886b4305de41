//! Reader for the per-snapshot manifest list.

use arrow::array::{
    Array, BinaryArray, BooleanArray, Int32Array, Int64Array, ListArray, StringArray, StructArray,
};
use arrow::record_batch::RecordBatch;

use super::{downcast, required_column, FieldSummary, Manifest, ManifestContent};
use crate::io::BatchSource;
use crate::spec::FormatVersion;
use crate::{Error, Result};

const BATCH_ROWS: usize = 2048;

/// Streams [`Manifest`] records out of one manifest-list file.
///
/// `initialize` binds a fresh batch source; `read` appends up to `n` records
/// and is re-callable until [`finished`](Self::finished). Records come out in
/// file-storage order, nothing more is guaranteed.
pub struct ManifestListReader {
    format_version: FormatVersion,
    source: Option<Box<dyn BatchSource + Send>>,
    batch: Option<RecordBatch>,
    offset: usize,
    done: bool,
    path: String,
}

impl ManifestListReader {
    pub fn new(format_version: FormatVersion) -> Self {
        Self {
            format_version,
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

    pub fn finished(&self) -> bool {
        self.done || self.source.is_none()
    }

    /// Append up to `count` manifests to `out`, returning how many were
    /// produced.
    pub fn read(&mut self, count: usize, out: &mut Vec<Manifest>) -> Result<usize> {
        let mut produced = 0;
        while produced < count && !self.finished() {
            if self.batch_exhausted() {
                if !self.pull_batch()? {
                    break;
                }
            }
            let batch = self.batch.clone().expect("pull_batch produced a batch");
            let take = (count - produced).min(batch.num_rows() - self.offset);
            self.decode_rows(&batch, self.offset, take, out)?;
            self.offset += take;
            produced += take;
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
        out: &mut Vec<Manifest>,
    ) -> Result<()> {
        let path = &self.path;
        let manifest_path: &StringArray =
            downcast(required_column(batch, path, "manifest_path")?.as_ref(), path, "manifest_path")?;
        let partition_spec_id: &Int32Array = downcast(
            required_column(batch, path, "partition_spec_id")?.as_ref(),
            path,
            "partition_spec_id",
        )?;

        // v1 manifest lists carry no content or sequence columns; everything
        // is a data manifest at sequence 0.
        let v2 = self.format_version >= FormatVersion::V2;
        let content = if v2 {
            Some(downcast::<Int32Array>(
                required_column(batch, path, "content")?.as_ref(),
                path,
                "content",
            )?)
        } else {
            None
        };
        let sequence_number = if v2 {
            Some(downcast::<Int64Array>(
                required_column(batch, path, "sequence_number")?.as_ref(),
                path,
                "sequence_number",
            )?)
        } else {
            None
        };

        let added_rows = self.optional_i64(batch, "added_rows_count")?;
        let existing_rows = self.optional_i64(batch, "existing_rows_count")?;
        let deleted_rows = self.optional_i64(batch, "deleted_rows_count")?;
        let partitions = match batch.column_by_name("partitions") {
            Some(column) => Some(downcast::<ListArray>(column.as_ref(), path, "partitions")?),
            None => None,
        };

        for row in offset..offset + count {
            out.push(Manifest {
                path: manifest_path.value(row).to_string(),
                content: match content {
                    Some(content) => match content.value(row) {
                        0 => ManifestContent::Data,
                        1 => ManifestContent::Deletes,
                        other => {
                            return Err(Error::integrity(
                                path,
                                format!("unknown manifest content kind {other}"),
                            ));
                        }
                    },
                    None => ManifestContent::Data,
                },
                partition_spec_id: partition_spec_id.value(row),
                sequence_number: sequence_number.map_or(0, |seq| seq.value(row)),
                added_rows_count: read_count(added_rows, row),
                existing_rows_count: read_count(existing_rows, row),
                deleted_rows_count: read_count(deleted_rows, row),
                field_summaries: match partitions {
                    Some(partitions) => self.decode_summaries(partitions, row)?,
                    None => None,
                },
            });
        }
        Ok(())
    }

    fn optional_i64<'a>(&self, batch: &'a RecordBatch, name: &str) -> Result<Option<&'a Int64Array>> {
        match batch.column_by_name(name) {
            Some(column) => Ok(Some(downcast(column.as_ref(), &self.path, name)?)),
            None => Ok(None),
        }
    }

    fn decode_summaries(
        &self,
        partitions: &ListArray,
        row: usize,
    ) -> Result<Option<Vec<FieldSummary>>> {
        if partitions.is_null(row) {
            return Ok(None);
        }
        let entry = partitions.value(row);
        let fields: &StructArray = downcast(entry.as_ref(), &self.path, "partitions entries")?;
        let contains_null = fields
            .column_by_name("contains_null")
            .and_then(|c| c.as_any().downcast_ref::<BooleanArray>());
        let contains_nan = fields
            .column_by_name("contains_nan")
            .and_then(|c| c.as_any().downcast_ref::<BooleanArray>());
        let lower = fields
            .column_by_name("lower_bound")
            .and_then(|c| c.as_any().downcast_ref::<BinaryArray>());
        let upper = fields
            .column_by_name("upper_bound")
            .and_then(|c| c.as_any().downcast_ref::<BinaryArray>());

        let mut summaries = Vec::with_capacity(fields.len());
        for i in 0..fields.len() {
            summaries.push(FieldSummary {
                contains_null: contains_null
                    .and_then(|c| (!c.is_null(i)).then(|| c.value(i))),
                contains_nan: contains_nan
                    .and_then(|c| (!c.is_null(i)).then(|| c.value(i))),
                lower_bound: lower
                    .and_then(|c| (!c.is_null(i)).then(|| c.value(i).to_vec())),
                upper_bound: upper
                    .and_then(|c| (!c.is_null(i)).then(|| c.value(i).to_vec())),
            });
        }
        Ok(Some(summaries))
    }
}

fn read_count(column: Option<&Int64Array>, row: usize) -> i64 {
    column.map_or(0, |c| if c.is_null(row) { 0 } else { c.value(row) })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int32Array, Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema as ArrowSchema};

    use super::*;

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

    fn v2_list_batch(rows: &[(&str, i32, i32, i64)]) -> RecordBatch {
        let schema = Arc::new(ArrowSchema::new(vec![
            Field::new("manifest_path", DataType::Utf8, false),
            Field::new("partition_spec_id", DataType::Int32, false),
            Field::new("content", DataType::Int32, false),
            Field::new("sequence_number", DataType::Int64, false),
            Field::new("added_rows_count", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
                Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.1))),
                Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.2))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.3))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|_| 10))),
            ],
        )
        .unwrap()
    }

    #[test]
    fn reads_v2_manifests_across_batches() {
        let mut reader = ManifestListReader::new(FormatVersion::V2);
        reader.initialize(
            Box::new(VecSource {
                batches: vec![
                    v2_list_batch(&[("m1.avro", 0, 0, 1), ("m2.avro", 0, 1, 2)]),
                    v2_list_batch(&[("m3.avro", 1, 0, 3)]),
                ],
            }),
            "snap-1.avro",
        );

        let mut out = Vec::new();
        // Pull one at a time to exercise the re-callable contract.
        while !reader.finished() {
            reader.read(1, &mut out).unwrap();
        }
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].path, "m1.avro");
        assert_eq!(out[0].content, ManifestContent::Data);
        assert_eq!(out[1].content, ManifestContent::Deletes);
        assert_eq!(out[1].sequence_number, 2);
        assert_eq!(out[2].partition_spec_id, 1);
        assert_eq!(out[2].added_rows_count, 10);
        assert!(out.iter().all(|m| m.field_summaries.is_none()));
    }

    #[test]
    fn v1_lists_default_content_and_sequence() {
        let schema = Arc::new(ArrowSchema::new(vec![
            Field::new("manifest_path", DataType::Utf8, false),
            Field::new("partition_spec_id", DataType::Int32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["m1.avro"])),
                Arc::new(Int32Array::from(vec![0])),
            ],
        )
        .unwrap();

        let mut reader = ManifestListReader::new(FormatVersion::V1);
        reader.initialize(Box::new(VecSource { batches: vec![batch] }), "snap.avro");
        let mut out = Vec::new();
        reader.read(16, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, ManifestContent::Data);
        assert_eq!(out[0].sequence_number, 0);
        assert_eq!(out[0].added_rows_count, 0);
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let schema = Arc::new(ArrowSchema::new(vec![Field::new(
            "manifest_path",
            DataType::Utf8,
            false,
        )]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["m.avro"]))])
                .unwrap();
        let mut reader = ManifestListReader::new(FormatVersion::V2);
        reader.initialize(Box::new(VecSource { batches: vec![batch] }), "snap.avro");
        let mut out = Vec::new();
        assert!(matches!(
            reader.read(16, &mut out),
            Err(Error::DataIntegrity { .. })
        ));
    }
}
