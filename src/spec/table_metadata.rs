use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::partition::PartitionSpec;
use super::schema::{Schema, SchemaJson};
use super::snapshot::{Snapshot, SnapshotLookup};
use crate::{Error, Result};

/// The Iceberg format version of a table's metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatVersion {
    V1,
    V2,
    V3,
}

impl FormatVersion {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FormatVersion::V1),
            2 => Ok(FormatVersion::V2),
            3 => Ok(FormatVersion::V3),
            other => Err(Error::configuration(format!(
                "unsupported iceberg format-version {other}, expected 1, 2 or 3"
            ))),
        }
    }
}

/// Parsed table metadata. One immutable instance per resolved table state;
/// parsed once per bind and shared read-only for the whole scan.
#[derive(Clone, Debug)]
pub struct TableMetadata {
    pub format_version: FormatVersion,
    pub location: String,
    pub current_schema_id: i32,
    pub schemas: HashMap<i32, Arc<Schema>>,
    pub partition_specs: HashMap<i32, Arc<PartitionSpec>>,
    pub default_spec_id: i32,
    pub snapshots: Vec<Snapshot>,
    pub current_snapshot_id: Option<i64>,
}

impl TableMetadata {
    /// Parse a table-metadata JSON document.
    pub fn parse(json: &str) -> Result<Self> {
        let raw: TableMetadataJson = serde_json::from_str(json)?;
        let format_version = FormatVersion::from_u8(raw.format_version)?;

        let mut schemas = HashMap::new();
        for schema_json in &raw.schemas {
            let schema = schema_json
                .build()
                .map_err(|message| Error::integrity(&raw.location, message))?;
            schemas.insert(schema.schema_id, Arc::new(schema));
        }
        // v1 documents may carry a single top-level `schema` instead.
        if schemas.is_empty() {
            if let Some(schema_json) = &raw.schema {
                let schema = schema_json
                    .build()
                    .map_err(|message| Error::integrity(&raw.location, message))?;
                schemas.insert(schema.schema_id, Arc::new(schema));
            }
        }
        if schemas.is_empty() {
            return Err(Error::integrity(
                &raw.location,
                "table metadata contains no schemas",
            ));
        }
        let current_schema_id = raw
            .current_schema_id
            .unwrap_or_else(|| schemas.keys().copied().next().unwrap_or_default());

        let mut partition_specs = HashMap::new();
        for spec in raw.partition_specs {
            partition_specs.insert(spec.spec_id, Arc::new(spec));
        }
        // v1 compatibility: bare `partition-spec` field list as spec 0.
        if partition_specs.is_empty() {
            if let Some(fields) = raw.partition_spec {
                partition_specs.insert(0, Arc::new(PartitionSpec { spec_id: 0, fields }));
            }
        }

        Ok(TableMetadata {
            format_version,
            location: raw.location,
            current_schema_id,
            schemas,
            partition_specs,
            default_spec_id: raw.default_spec_id,
            snapshots: raw.snapshots,
            current_snapshot_id: raw.current_snapshot_id.filter(|id| *id >= 0),
        })
    }

    pub fn schema_by_id(&self, schema_id: i32) -> Option<Arc<Schema>> {
        self.schemas.get(&schema_id).cloned()
    }

    pub fn current_schema(&self) -> Result<Arc<Schema>> {
        self.schema_by_id(self.current_schema_id).ok_or_else(|| {
            Error::integrity(
                &self.location,
                format!(
                    "'current-schema-id' {} does not name a schema",
                    self.current_schema_id
                ),
            )
        })
    }

    pub fn partition_spec_by_id(&self, spec_id: i32) -> Option<Arc<PartitionSpec>> {
        self.partition_specs.get(&spec_id).cloned()
    }

    /// Select the snapshot a scan will read. `None` means the table has no
    /// snapshot yet (an empty table), which is not an error.
    pub fn snapshot_for(&self, lookup: SnapshotLookup) -> Result<Option<&Snapshot>> {
        match lookup {
            SnapshotLookup::Latest => {
                let Some(current_id) = self.current_snapshot_id else {
                    return Ok(None);
                };
                self.snapshots
                    .iter()
                    .find(|s| s.snapshot_id == current_id)
                    .map(Some)
                    .ok_or_else(|| {
                        Error::integrity(
                            &self.location,
                            format!("'current-snapshot-id' {current_id} does not name a snapshot"),
                        )
                    })
            }
            SnapshotLookup::ById(id) => self
                .snapshots
                .iter()
                .find(|s| s.snapshot_id == id)
                .map(Some)
                .ok_or_else(|| {
                    Error::configuration(format!("no snapshot with id {id} exists in this table"))
                }),
            SnapshotLookup::AtTimestamp(millis) => Ok(self
                .snapshots
                .iter()
                .filter(|s| s.timestamp_ms <= millis)
                .max_by_key(|s| s.timestamp_ms)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableMetadataJson {
    #[serde(rename = "format-version")]
    format_version: u8,
    #[serde(default)]
    location: String,
    #[serde(rename = "current-schema-id")]
    current_schema_id: Option<i32>,
    #[serde(default)]
    schemas: Vec<SchemaJson>,
    schema: Option<SchemaJson>,
    #[serde(rename = "partition-specs", default)]
    partition_specs: Vec<PartitionSpec>,
    #[serde(rename = "partition-spec")]
    partition_spec: Option<Vec<super::partition::PartitionField>>,
    #[serde(rename = "default-spec-id", default)]
    default_spec_id: i32,
    #[serde(default)]
    snapshots: Vec<Snapshot>,
    #[serde(rename = "current-snapshot-id")]
    current_snapshot_id: Option<i64>,
}
