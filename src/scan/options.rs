use crate::spec::SnapshotLookup;

/// Options controlling how a table is resolved into scannable files.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    snapshot: SnapshotLookup,
    allow_moved_paths: bool,
    skip_deleted: bool,
    use_encrypted_range_filters: bool,
}

impl ScanOptions {
    /// Create a new builder for ScanOptions
    ///
    /// # Example
    /// ```
    /// use floe::{ScanOptions, SnapshotLookup};
    ///
    /// let options = ScanOptions::builder()
    ///     .snapshot(SnapshotLookup::ById(42))
    ///     .allow_moved_paths(true)
    ///     .build();
    /// ```
    pub fn builder() -> ScanOptionsBuilder {
        ScanOptionsBuilder::default()
    }

    /// Which snapshot the scan reads
    pub fn snapshot(&self) -> SnapshotLookup {
        self.snapshot
    }

    /// Check if metadata paths are re-anchored at the table location
    pub fn allow_moved_paths(&self) -> bool {
        self.allow_moved_paths
    }

    /// Check if DELETED-status manifest entries are dropped during decode
    pub fn skip_deleted(&self) -> bool {
        self.skip_deleted
    }

    /// Check if encrypted bloom-filter range pruning is active
    pub fn use_encrypted_range_filters(&self) -> bool {
        self.use_encrypted_range_filters
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            snapshot: SnapshotLookup::Latest,
            allow_moved_paths: false,
            skip_deleted: true,
            use_encrypted_range_filters: false,
        }
    }
}

/// Builder for ScanOptions
#[derive(Clone, Debug, Default)]
pub struct ScanOptionsBuilder {
    snapshot: Option<SnapshotLookup>,
    allow_moved_paths: Option<bool>,
    skip_deleted: Option<bool>,
    use_encrypted_range_filters: Option<bool>,
}

impl ScanOptionsBuilder {
    /// Select the snapshot to scan (default: the table's current snapshot)
    pub fn snapshot(mut self, lookup: SnapshotLookup) -> Self {
        self.snapshot = Some(lookup);
        self
    }

    /// Re-anchor metadata paths at the table location (default: false)
    ///
    /// Needed when a table directory has been relocated and the absolute
    /// paths recorded in its metadata no longer resolve.
    pub fn allow_moved_paths(mut self, value: bool) -> Self {
        self.allow_moved_paths = Some(value);
        self
    }

    /// Drop DELETED-status manifest entries during decode (default: true)
    ///
    /// Deleted entries describe files removed from the table; disabling this
    /// is only useful for metadata inspection, never for planning.
    pub fn skip_deleted(mut self, value: bool) -> Self {
        self.skip_deleted = Some(value);
        self
    }

    /// Prune files via encrypted bloom-filter range queries (default: false)
    ///
    /// Requires the range-key secret to be present; plaintext bounds are
    /// absent from manifests written in this mode.
    pub fn use_encrypted_range_filters(mut self, value: bool) -> Self {
        self.use_encrypted_range_filters = Some(value);
        self
    }

    /// Build the ScanOptions
    pub fn build(self) -> ScanOptions {
        ScanOptions {
            snapshot: self.snapshot.unwrap_or_default(),
            allow_moved_paths: self.allow_moved_paths.unwrap_or(false),
            skip_deleted: self.skip_deleted.unwrap_or(true),
            use_encrypted_range_filters: self.use_encrypted_range_filters.unwrap_or(false),
        }
    }
}
