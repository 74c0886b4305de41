//! Resolve an Apache Iceberg table snapshot into the concrete set of data
//! files a query must read.
//!
//! The crate interprets v1/v2/v3 table metadata, prunes manifests and files
//! through statistics and pushed-down predicates, and reconciles positional
//! and equality deletes, all under lazy on-demand expansion: a scan that
//! stops after the first file never pays for decoding the rest.
//!
//! The binary container decoding (Avro) and the payload format reads
//! (Parquet) are consumed through the narrow traits in [`io`]; this crate
//! never parses those formats itself, except for the bundled
//! [`io::LocalParquetReader`] convenience.

pub mod error;
pub mod expr;
pub mod io;
pub mod manifest;
pub mod scan;
pub mod spec;

pub use error::{Error, Result};
pub use expr::{CmpOp, ColumnFilter, Expr, FilterSet, TriState};
pub use io::{BatchSource, BatchSourceFactory, ManifestKind, PayloadReader, ScanFile, SecretStore};
pub use scan::{
    BoundSchema, BoundsStats, DeleteStore, EqualityDelete, ExpandResult, QueryToken,
    RangeEngineFactory, RangeQueryEngine, ScanOptions, TableScan, TokenRange,
};
pub use spec::{
    FormatVersion, PartitionSpec, Schema, Snapshot, SnapshotLookup, TableMetadata, Transform,
};
