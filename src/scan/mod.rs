//! The scan planner: resolves one table snapshot into the data files a query
//! must read, with manifest- and file-level pruning and delete
//! reconciliation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use arrow_schema::DataType;
use roaring::RoaringTreemap;
use tracing::debug;

use crate::expr::{combine_filters, Expr, FilterSet};
use crate::io::{resolve_path, BatchSourceFactory, ManifestKind, PayloadReader, ScanFile, SecretStore};
use crate::manifest::{
    EntryContent, EntryStatus, Manifest, ManifestContent, ManifestEntry, ManifestFileReader,
    ManifestListReader,
};
use crate::spec::{FieldIndex, FormatVersion, Schema, Snapshot, SnapshotLookup, TableMetadata, Transform};
use crate::{Error, Result};

pub mod deletes;
pub mod encrypted;
pub mod options;
pub mod prune;

pub use deletes::{DeleteStore, EqualityDelete};
pub use encrypted::{QueryToken, RangeEngineFactory, RangeQueryEngine, TokenRange};
pub use options::{ScanOptions, ScanOptionsBuilder};
pub use prune::{match_bounds, BoundsStats};

use encrypted::RangeQueryState;

const READ_CHUNK: usize = 2048;

/// Result of probing how many files a scan will produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpandResult {
    NoFiles,
    SingleFile,
    MultipleFiles,
}

/// The output schema a scan was bound to.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundSchema {
    /// Output column names, deduplicated.
    pub names: Vec<String>,
    pub types: Vec<DataType>,
}

struct BoundState {
    schema: Arc<Schema>,
    field_index: FieldIndex,
    names: Vec<String>,
    types: Vec<DataType>,
    snapshot: Option<Snapshot>,
}

/// Mutable scan state behind the planner's single mutex.
///
/// unbound -> bound -> files-initializing -> files-streaming -> exhausted;
/// every transition happens under the lock, so concurrent binds and file
/// expansions serialize with exactly one initialization winner.
struct ScanState {
    bound: Option<BoundState>,
    initialized: bool,
    data_manifests: Vec<Manifest>,
    delete_manifests: Vec<Manifest>,
    current_data_manifest: usize,
    data_reader: Option<ManifestFileReader>,
    data_files: Vec<ManifestEntry>,
    deletes: DeleteStore,
    deletes_processed: bool,
    range_query: Option<RangeQueryState>,
    active_query_id: u64,
}

impl ScanState {
    fn new() -> Self {
        ScanState {
            bound: None,
            initialized: false,
            data_manifests: Vec::new(),
            delete_manifests: Vec::new(),
            current_data_manifest: 0,
            data_reader: None,
            data_files: Vec::new(),
            deletes: DeleteStore::new(),
            deletes_processed: false,
            range_query: None,
            active_query_id: 0,
        }
    }
}

/// Lazily expanded list of the data files one table snapshot resolves to.
///
/// Immutable inputs (metadata, options, pushed filters) live on the planner
/// itself; everything mutable sits in one lock-guarded [`ScanState`].
/// Pushdown never mutates a planner, it derives a new one.
pub struct TableScan {
    metadata: Arc<TableMetadata>,
    options: ScanOptions,
    sources: Arc<dyn BatchSourceFactory>,
    payload: Arc<dyn PayloadReader>,
    secrets: Option<Arc<dyn SecretStore>>,
    range_engines: Option<Arc<dyn RangeEngineFactory>>,
    filters: FilterSet,
    state: Mutex<ScanState>,
}

impl TableScan {
    pub fn new(
        metadata: Arc<TableMetadata>,
        sources: Arc<dyn BatchSourceFactory>,
        payload: Arc<dyn PayloadReader>,
        options: ScanOptions,
    ) -> Self {
        TableScan {
            metadata,
            options,
            sources,
            payload,
            secrets: None,
            range_engines: None,
            filters: FilterSet::new(),
            state: Mutex::new(ScanState::new()),
        }
    }

    /// Attach the collaborators the encrypted-range feature needs. Without
    /// them, enabling [`ScanOptions::use_encrypted_range_filters`] fails at
    /// first use.
    pub fn with_range_engine(
        mut self,
        secrets: Arc<dyn SecretStore>,
        engines: Arc<dyn RangeEngineFactory>,
    ) -> Self {
        self.secrets = Some(secrets);
        self.range_engines = Some(engines);
        self
    }

    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Set the active query identifier, used to scope encrypted-range query
    /// tokens. Tokens are recomputed only when this changes.
    pub fn set_active_query(&self, query_id: u64) {
        self.state().active_query_id = query_id;
    }

    /// Resolve the output schema. Idempotent: the first call resolves the
    /// snapshot and schema and initializes the manifest partition; later
    /// calls return the cached result.
    pub fn bind(&self) -> Result<BoundSchema> {
        let mut state = self.state();
        self.ensure_bound(&mut state)?;
        let bound = state.bound.as_ref().expect("bind populated the state");
        Ok(BoundSchema {
            names: bound.names.clone(),
            types: bound.types.clone(),
        })
    }

    /// The `index`-th data file surviving pruning, expanding manifests only
    /// as far as needed. `Ok(None)` once the scan is exhausted.
    pub fn get_file(&self, index: usize) -> Result<Option<ScanFile>> {
        let mut state = self.state();
        self.ensure_bound(&mut state)?;
        self.expand_until(&mut state, index + 1)?;

        let Some(entry) = state.data_files.get(index) else {
            return Ok(None);
        };
        if !entry.file_format.eq_ignore_ascii_case("parquet") {
            return Err(Error::not_implemented(format!(
                "file format '{}' is not supported, only 'parquet' is",
                entry.file_format
            )));
        }
        let path = resolve_path(
            &self.metadata.location,
            &entry.file_path,
            self.options.allow_moved_paths(),
        );
        Ok(Some(ScanFile::new(
            path,
            entry.file_size_in_bytes as u64,
            entry.sequence_number,
        )))
    }

    /// Force full expansion and return every surviving file.
    pub fn get_all_files(&self) -> Result<Vec<ScanFile>> {
        let mut files = Vec::new();
        let mut index = 0;
        while let Some(file) = self.get_file(index)? {
            files.push(file);
            index += 1;
        }
        Ok(files)
    }

    /// Force full expansion and count the surviving files. v1 manifests
    /// carry no usable aggregates, so enumeration is the only option there.
    pub fn total_file_count(&self) -> Result<usize> {
        let mut index = {
            let state = self.state();
            state.data_files.len()
        };
        while self.get_file(index)?.is_some() {
            index += 1;
        }
        let state = self.state();
        Ok(state.data_files.len())
    }

    /// Expand just far enough to tell no/one/many files apart.
    pub fn expand_result(&self) -> Result<ExpandResult> {
        self.get_file(1)?;
        let state = self.state();
        Ok(match state.data_files.len() {
            0 => ExpandResult::NoFiles,
            1 => ExpandResult::SingleFile,
            _ => ExpandResult::MultipleFiles,
        })
    }

    /// Approximate row-count upper bound for v2+ tables, `None` for v1.
    ///
    /// Sums added and existing rows over retained data manifests, minus the
    /// added rows of retained delete manifests. Deletes may target rows
    /// outside the retained delete manifests, so this is an estimate, not a
    /// bound the caller can rely on exactly.
    pub fn cardinality(&self, query_id: u64) -> Result<Option<u64>> {
        {
            let mut state = self.state();
            state.active_query_id = query_id;
            if self.options.use_encrypted_range_filters() {
                self.ensure_range_state(&mut state)?;
                if let Some(range) = state.range_query.as_mut() {
                    range.refresh_token(query_id, &self.filters);
                }
            }
        }

        if self.metadata.format_version == FormatVersion::V1 {
            return Ok(None);
        }

        // Retained manifests are only complete after full expansion.
        self.total_file_count()?;

        let state = self.state();
        let mut cardinality: i64 = 0;
        for manifest in &state.data_manifests {
            cardinality += manifest.added_rows_count + manifest.existing_rows_count;
        }
        for manifest in &state.delete_manifests {
            cardinality -= manifest.added_rows_count;
        }
        Ok(Some(cardinality.max(0) as u64))
    }

    /// Derive a new planner carrying the union of the already-pushed filters
    /// and `new_filters`. The bound schema is inherited, not re-resolved.
    pub fn pushdown_internal(&self, new_filters: &FilterSet) -> Result<TableScan> {
        let bound = {
            let mut state = self.state();
            self.ensure_bound(&mut state)?;
            let bound = state.bound.as_ref().expect("bind populated the state");
            BoundState {
                schema: bound.schema.clone(),
                field_index: FieldIndex::new(&bound.schema),
                names: bound.names.clone(),
                types: bound.types.clone(),
                snapshot: bound.snapshot.clone(),
            }
        };

        let mut state = ScanState::new();
        state.bound = Some(bound);
        Ok(TableScan {
            metadata: self.metadata.clone(),
            options: self.options.clone(),
            sources: self.sources.clone(),
            payload: self.payload.clone(),
            secrets: self.secrets.clone(),
            range_engines: self.range_engines.clone(),
            filters: self.filters.union(new_filters),
            state: Mutex::new(state),
        })
    }

    /// Normalize arbitrary boolean expressions into per-column filters and
    /// push them down. `Ok(None)` when nothing usable can be pushed.
    pub fn complex_filter_pushdown(&self, exprs: &[Expr]) -> Result<Option<TableScan>> {
        if exprs.is_empty() {
            return Ok(None);
        }
        let bound = self.bind()?;
        let lookup: HashMap<String, usize> = bound
            .names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        let filter_set = combine_filters(exprs, &lookup);
        if filter_set.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.pushdown_internal(&filter_set)?))
    }

    /// Incremental pushdown for filters arriving mid-scan. Filters already
    /// pushed are diffed away; when nothing new remains this is a no-op and
    /// returns `Ok(None)` instead of re-planning.
    pub fn dynamic_filter_pushdown(&self, new_filters: &FilterSet) -> Result<Option<TableScan>> {
        if new_filters.is_empty() {
            return Ok(None);
        }
        let mut additions = FilterSet::new();
        for (column, filter) in new_filters.iter() {
            if self.filters.get(column) == Some(filter) {
                continue;
            }
            additions.push(column, filter.clone());
        }
        if additions.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.pushdown_internal(&additions)?))
    }

    /// Take ownership of the positional deletes targeting `path`. One-shot:
    /// later calls for the same path return `None`. Forces all delete
    /// manifests to be processed first, since any of them may target the
    /// file.
    pub fn take_positional_deletes(&self, path: &str) -> Result<Option<RoaringTreemap>> {
        let mut state = self.state();
        self.ensure_bound(&mut state)?;
        self.process_deletes(&mut state)?;
        Ok(state.deletes.take_positional(path))
    }

    /// Equality-delete predicates applicable to a data file at
    /// `data_sequence` (strictly older than the deletes).
    pub fn equality_deletes_for(&self, data_sequence: i64) -> Result<Vec<EqualityDelete>> {
        let mut state = self.state();
        self.ensure_bound(&mut state)?;
        self.process_deletes(&mut state)?;
        Ok(state
            .deletes
            .equality_deletes_for(data_sequence)
            .cloned()
            .collect())
    }

    fn state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_bound(&self, state: &mut ScanState) -> Result<()> {
        if state.bound.is_none() {
            let snapshot = self.metadata.snapshot_for(self.options.snapshot())?.cloned();
            let schema = match &snapshot {
                Some(snapshot) if self.options.snapshot() != SnapshotLookup::Latest => snapshot
                    .schema_id
                    .and_then(|id| self.metadata.schema_by_id(id))
                    .map_or_else(|| self.metadata.current_schema(), Ok)?,
                _ => self.metadata.current_schema()?,
            };
            let names = dedup_names(schema.columns.iter().map(|c| c.name.clone()).collect());
            let types = schema.columns.iter().map(|c| c.data_type.clone()).collect();
            state.bound = Some(BoundState {
                field_index: FieldIndex::new(&schema),
                schema,
                names,
                types,
                snapshot,
            });
        }
        if !state.initialized {
            self.initialize_files(state)?;
        }
        Ok(())
    }

    /// Read the whole manifest list once, pruning and partitioning manifests
    /// into data and delete sets. Delete manifests must all be known up
    /// front; data manifests are only opened on demand later.
    fn initialize_files(&self, state: &mut ScanState) -> Result<()> {
        state.initialized = true;
        let bound = state.bound.as_ref().expect("bind precedes initialization");
        let Some(snapshot) = &bound.snapshot else {
            // Empty table.
            return Ok(());
        };

        let list_path = resolve_path(
            &self.metadata.location,
            &snapshot.manifest_list,
            self.options.allow_moved_paths(),
        );
        let mut list_reader = ManifestListReader::new(self.metadata.format_version);
        list_reader.initialize(
            self.sources.open(&list_path, ManifestKind::ManifestList)?,
            list_path.clone(),
        );

        let mut manifests = Vec::new();
        while !list_reader.finished() {
            list_reader.read(READ_CHUNK, &mut manifests)?;
        }

        for manifest in manifests {
            if !self.manifest_matches_filter(bound, &manifest)? {
                debug!(manifest = %manifest.path, "filter pushdown skipped manifest");
                continue;
            }
            match manifest.content {
                ManifestContent::Data => state.data_manifests.push(manifest),
                ManifestContent::Deletes => state.delete_manifests.push(manifest),
            }
        }
        state.data_reader = Some(ManifestFileReader::new(
            self.metadata.format_version,
            self.options.skip_deleted(),
        ));
        Ok(())
    }

    /// Expand data manifests until `needed` files are materialized or the
    /// manifests run out. Never reads further than the request requires.
    fn expand_until(&self, state: &mut ScanState, needed: usize) -> Result<()> {
        if self.options.use_encrypted_range_filters() && !self.filters.is_empty() {
            self.ensure_range_state(state)?;
        }

        while state.data_files.len() < needed {
            let reader_finished = state
                .data_reader
                .as_ref()
                .is_none_or(|reader| reader.finished());
            if reader_finished {
                if state.current_data_manifest >= state.data_manifests.len() {
                    break;
                }
                let manifest = &state.data_manifests[state.current_data_manifest];
                let path = resolve_path(
                    &self.metadata.location,
                    &manifest.path,
                    self.options.allow_moved_paths(),
                );
                let source = self.sources.open(&path, ManifestKind::Manifest)?;
                let reader = state.data_reader.as_mut().expect("initialized scan has a reader");
                reader.initialize(source, path);
                reader.set_sequence_number(manifest.sequence_number);
                reader.set_partition_spec_id(manifest.partition_spec_id);
            }

            let remaining = needed - state.data_files.len();
            let ScanState {
                bound,
                data_reader,
                data_files,
                range_query,
                active_query_id,
                ..
            } = state;
            let reader = data_reader.as_mut().expect("initialized scan has a reader");
            let bound = bound.as_ref().expect("bind precedes expansion");

            if self.filters.is_empty() {
                reader.read(remaining, data_files)?;
            } else {
                let mut entries = Vec::new();
                reader.read(remaining, &mut entries)?;
                for entry in entries {
                    if !self.file_matches_filter(bound, range_query, *active_query_id, &entry) {
                        debug!(file = %entry.file_path, "filter pushdown skipped data file");
                        continue;
                    }
                    data_files.push(entry);
                }
            }

            if state
                .data_reader
                .as_ref()
                .is_some_and(|reader| reader.finished())
            {
                state.current_data_manifest += 1;
            }
        }

        debug_assert!(state
            .data_files
            .iter()
            .all(|e| e.content == EntryContent::Data && e.status != EntryStatus::Deleted));
        Ok(())
    }

    /// Manifest-level pruning over partition field summaries. Fail-open:
    /// only a provable mismatch excludes the manifest.
    fn manifest_matches_filter(&self, bound: &BoundState, manifest: &Manifest) -> Result<bool> {
        let spec = self
            .metadata
            .partition_spec_by_id(manifest.partition_spec_id)
            .ok_or_else(|| {
                Error::integrity(
                    &manifest.path,
                    format!(
                        "manifest references partition spec {} which does not exist",
                        manifest.partition_spec_id
                    ),
                )
            })?;
        let Some(summaries) = &manifest.field_summaries else {
            return Ok(true);
        };
        if summaries.len() != spec.fields.len() {
            return Err(Error::integrity(
                &manifest.path,
                format!(
                    "manifest has {} field summaries but partition spec {} has {} fields",
                    summaries.len(),
                    spec.spec_id,
                    spec.fields.len()
                ),
            ));
        }
        if self.filters.is_empty() {
            return Ok(true);
        }

        for (summary, field) in summaries.iter().zip(&spec.fields) {
            let Some(ordinal) = bound.field_index.ordinal(field.source_id) else {
                continue;
            };
            let Some(filter) = self.filters.get(ordinal) else {
                continue;
            };
            let column = &bound.schema.columns[ordinal];
            let result_type = field.transform.result_type(&column.data_type);
            let stats = BoundsStats::for_summary(summary, &result_type);
            if !match_bounds(filter, &stats, &field.transform) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// File-level pruning over per-column bounds, or encrypted bloom
    /// filters when that mode is active (bounds are absent then, by
    /// construction of the manifests).
    fn file_matches_filter(
        &self,
        bound: &BoundState,
        range_query: &mut Option<RangeQueryState>,
        active_query_id: u64,
        entry: &ManifestEntry,
    ) -> bool {
        for (ordinal, filter) in self.filters.iter() {
            let Some(column) = bound.schema.columns.get(ordinal) else {
                continue;
            };

            if self.options.use_encrypted_range_filters() {
                if let (Some(range), Some(blob)) =
                    (range_query.as_mut(), entry.bloom_filters.get(&column.field_id))
                {
                    if !range.file_may_match(active_query_id, &self.filters, blob) {
                        return false;
                    }
                }
                // Plaintext bounds are withheld in this mode.
                continue;
            }

            if entry.lower_bounds.is_empty() || entry.upper_bounds.is_empty() {
                continue;
            }
            let stats = BoundsStats::for_entry(entry, column.field_id, &column.data_type);
            if !match_bounds(filter, &stats, &Transform::Identity) {
                return false;
            }
        }
        true
    }

    fn ensure_range_state(&self, state: &mut ScanState) -> Result<()> {
        if state.range_query.is_some() {
            return Ok(());
        }
        let (Some(secrets), Some(engines)) = (&self.secrets, &self.range_engines) else {
            return Err(Error::configuration(
                "encrypted range filters require a secret store and a range engine",
            ));
        };
        state.range_query = Some(RangeQueryState::initialize(
            secrets.as_ref(),
            engines.as_ref(),
        )?);
        Ok(())
    }

    /// Read every delete manifest and route its entries into the delete
    /// store. All of them must be processed before any per-file lookup: in
    /// v2 nothing says which delete file targets which data file.
    fn process_deletes(&self, state: &mut ScanState) -> Result<()> {
        if state.deletes_processed {
            return Ok(());
        }
        state.deletes_processed = true;

        let ScanState {
            bound,
            delete_manifests,
            deletes,
            ..
        } = state;
        let bound = bound.as_ref().expect("bind precedes delete processing");
        let mut reader =
            ManifestFileReader::new(self.metadata.format_version, self.options.skip_deleted());

        for manifest in delete_manifests.iter() {
            let path = resolve_path(
                &self.metadata.location,
                &manifest.path,
                self.options.allow_moved_paths(),
            );
            reader.initialize(self.sources.open(&path, ManifestKind::Manifest)?, path);
            reader.set_sequence_number(manifest.sequence_number);
            reader.set_partition_spec_id(manifest.partition_spec_id);

            let mut entries = Vec::new();
            while !reader.finished() {
                reader.read(READ_CHUNK, &mut entries)?;
            }

            for entry in &entries {
                let resolved = resolve_path(
                    &self.metadata.location,
                    &entry.file_path,
                    self.options.allow_moved_paths(),
                );
                match entry.content {
                    EntryContent::PositionDeletes => {
                        deletes.scan_positional(self.payload.as_ref(), entry, &resolved)?;
                    }
                    EntryContent::EqualityDeletes => {
                        deletes.scan_equality(
                            self.payload.as_ref(),
                            entry,
                            &resolved,
                            &bound.schema,
                            &bound.field_index,
                        )?;
                    }
                    EntryContent::Data => {
                        return Err(Error::integrity(
                            &manifest.path,
                            format!(
                                "delete manifest contains a data entry '{}'",
                                entry.file_path
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Deduplicate output column names, suffixing repeats.
fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        match seen.get_mut(&name) {
            None => {
                seen.insert(name.clone(), 0);
                result.push(name);
            }
            Some(count) => {
                *count += 1;
                let mut candidate = format!("{name}_{count}");
                while seen.contains_key(&candidate) {
                    candidate = format!("{candidate}_");
                }
                seen.insert(candidate.clone(), 0);
                result.push(candidate);
            }
        }
    }
    result
}
