use serde::Deserialize;

/// An immutable, versioned view of the table's file set.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
    #[serde(rename = "sequence-number", default)]
    pub sequence_number: i64,
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
    #[serde(rename = "manifest-list")]
    pub manifest_list: String,
    #[serde(rename = "schema-id")]
    pub schema_id: Option<i32>,
}

/// How the scan selects its snapshot. Selected once per scan and held for
/// the scan's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotLookup {
    #[default]
    Latest,
    ById(i64),
    /// Most recent snapshot committed at or before the given epoch millis.
    AtTimestamp(i64),
}
