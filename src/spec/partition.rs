use serde::Deserialize;

use super::transform::Transform;

/// One field of a partition spec: a source column (by field-id) and the
/// transform producing the partition value.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PartitionField {
    #[serde(rename = "source-id")]
    pub source_id: i32,
    #[serde(rename = "field-id", default)]
    pub field_id: i32,
    pub name: String,
    pub transform: Transform,
}

/// A partition spec. Each manifest is written under exactly one spec id and
/// its field summaries line up positionally with `fields`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PartitionSpec {
    #[serde(rename = "spec-id", default)]
    pub spec_id: i32,
    pub fields: Vec<PartitionField>,
}
