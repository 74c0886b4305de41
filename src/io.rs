//! Narrow interfaces to the collaborators this crate consumes but does not
//! implement: the manifest batch decoder, the payload (Parquet) reader used
//! for delete files, secret lookup and path resolution.

use std::collections::HashMap;
use std::fs::File;

use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::Result;

/// Which manifest-format file a batch source is being opened for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestKind {
    ManifestList,
    Manifest,
}

/// A pull-based cursor over the decoded rows of one manifest container file.
///
/// The container format (Avro) is decoded by the collaborator; this crate
/// only consumes the resulting columns by name. `next_batch` may return
/// fewer rows than requested; `None` and `finished()` both signal
/// exhaustion.
pub trait BatchSource {
    fn finished(&self) -> bool;
    fn next_batch(&mut self, max_rows: usize) -> Result<Option<RecordBatch>>;
}

/// Opens [`BatchSource`]s for manifest files by path.
pub trait BatchSourceFactory: Send + Sync {
    fn open(&self, path: &str, kind: ManifestKind) -> Result<Box<dyn BatchSource + Send>>;
}

/// Reads payload-format (Parquet) files as record batches. The scan planner
/// uses this exclusively to materialize delete-file rows.
pub trait PayloadReader: Send + Sync {
    fn read(
        &self,
        path: &str,
        projection: Option<&[String]>,
    ) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>>;
}

/// Lookup of named secrets (key/value maps). Absence of a required secret is
/// a fatal configuration error at the call site, never a silent fallback.
pub trait SecretStore: Send + Sync {
    fn get(&self, name: &str) -> Option<HashMap<String, String>>;
}

/// A [`PayloadReader`] backed by the `parquet` crate, reading from the local
/// filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalParquetReader;

impl PayloadReader for LocalParquetReader {
    fn read(
        &self,
        path: &str,
        projection: Option<&[String]>,
    ) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>> {
        let file = File::open(path)?;
        let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        if let Some(columns) = projection {
            let root_indices: Vec<usize> = builder
                .schema()
                .fields()
                .iter()
                .enumerate()
                .filter(|(_, field)| columns.iter().any(|c| c == field.name()))
                .map(|(idx, _)| idx)
                .collect();
            let mask = parquet::arrow::ProjectionMask::roots(
                builder.parquet_schema(),
                root_indices,
            );
            builder = builder.with_projection(mask);
        }
        let reader = builder.build()?;
        Ok(Box::new(reader.map(|batch| batch.map_err(Into::into))))
    }
}

/// Resolve a path recorded in table metadata to the path the consumer should
/// open.
///
/// Iceberg metadata stores absolute paths; when the table has been relocated
/// (`allow_moved_paths`), the recorded prefix is replaced with the current
/// table location, anchored at the `metadata`/`data` directory component.
/// Otherwise paths are used verbatim.
pub fn resolve_path(table_location: &str, raw: &str, allow_moved_paths: bool) -> String {
    if !allow_moved_paths {
        return raw.to_string();
    }
    let anchored = ["/metadata/", "/data/"]
        .iter()
        .filter_map(|anchor| raw.rfind(anchor).map(|pos| &raw[pos + 1..]))
        .max_by_key(|suffix| suffix.len());
    match anchored {
        Some(suffix) => format!("{}/{}", table_location.trim_end_matches('/'), suffix),
        None => raw.to_string(),
    }
}

/// A data file resolved by the planner, with the per-file annotations the
/// consuming execution layer uses for its caches.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanFile {
    pub path: String,
    pub file_size_in_bytes: u64,
    /// Committed Iceberg files are immutable, so external cache validation
    /// can be skipped entirely.
    pub validate_external_cache: bool,
    pub etag: String,
    pub last_modified_epoch: i64,
    /// Sequence number of the data file, needed to select applicable deletes.
    pub sequence_number: i64,
}

impl ScanFile {
    pub(crate) fn new(path: String, file_size_in_bytes: u64, sequence_number: i64) -> Self {
        Self {
            path,
            file_size_in_bytes,
            validate_external_cache: false,
            etag: String::new(),
            last_modified_epoch: 0,
            sequence_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbatim_paths_when_moves_disallowed() {
        assert_eq!(
            resolve_path("s3://new/table", "s3://old/table/data/f.parquet", false),
            "s3://old/table/data/f.parquet"
        );
    }

    #[test]
    fn moved_paths_reanchor_at_data_or_metadata() {
        assert_eq!(
            resolve_path("s3://new/table/", "s3://old/table/data/part/f.parquet", true),
            "s3://new/table/data/part/f.parquet"
        );
        assert_eq!(
            resolve_path("s3://new/table", "s3://old/table/metadata/snap.avro", true),
            "s3://new/table/metadata/snap.avro"
        );
        // No anchor component: leave untouched.
        assert_eq!(resolve_path("s3://new/table", "relative.avro", true), "relative.avro");
    }
}
