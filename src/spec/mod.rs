//! The immutable Iceberg metadata model: table metadata, snapshots, schemas,
//! partition specs and transforms, plus bound-value decoding.

pub mod partition;
pub mod schema;
pub mod snapshot;
pub mod table_metadata;
pub mod transform;
pub mod values;

pub use partition::{PartitionField, PartitionSpec};
pub use schema::{Column, FieldIndex, Schema};
pub use snapshot::{Snapshot, SnapshotLookup};
pub use table_metadata::{FormatVersion, TableMetadata};
pub use transform::Transform;
