use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, TimeUnit};
use serde::Deserialize;

/// One table column. `field_id` is the stable join key between the schema,
/// manifest statistics maps and partition-spec source ids; the ordinal
/// position may change across schema evolution and is never used as a key.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub field_id: i32,
    pub name: String,
    pub data_type: DataType,
    pub required: bool,
}

/// An Iceberg schema: an ordered sequence of columns.
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    pub schema_id: i32,
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn column_by_field_id(&self, field_id: i32) -> Option<&Column> {
        self.columns.iter().find(|c| c.field_id == field_id)
    }
}

/// Field-id to schema-ordinal table, built once per bind.
///
/// Every statistics or partition lookup goes through this table; raw vector
/// indices are never used as field identifiers.
#[derive(Clone, Debug, Default)]
pub struct FieldIndex {
    ordinals: HashMap<i32, usize>,
}

impl FieldIndex {
    pub fn new(schema: &Schema) -> Self {
        let ordinals = schema
            .columns
            .iter()
            .enumerate()
            .map(|(ordinal, column)| (column.field_id, ordinal))
            .collect();
        Self { ordinals }
    }

    pub fn ordinal(&self, field_id: i32) -> Option<usize> {
        self.ordinals.get(&field_id).copied()
    }
}

// -- JSON representation ----------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct SchemaJson {
    #[serde(rename = "schema-id", default)]
    pub schema_id: i32,
    pub fields: Vec<FieldJson>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FieldJson {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: TypeJson,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TypeJson {
    Primitive(String),
    Nested(Box<NestedTypeJson>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum NestedTypeJson {
    Struct {
        fields: Vec<FieldJson>,
    },
    List {
        #[serde(rename = "element-id")]
        element_id: i32,
        element: TypeJson,
        #[serde(rename = "element-required", default)]
        element_required: bool,
    },
    Map {
        #[serde(rename = "key-id")]
        key_id: i32,
        key: TypeJson,
        #[serde(rename = "value-id")]
        value_id: i32,
        value: TypeJson,
        #[serde(rename = "value-required", default)]
        value_required: bool,
    },
}

impl SchemaJson {
    pub(crate) fn build(&self) -> Result<Schema, String> {
        let mut columns = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            columns.push(Column {
                field_id: field.id,
                name: field.name.clone(),
                data_type: data_type_from_json(&field.field_type)?,
                required: field.required,
            });
        }
        Ok(Schema {
            schema_id: self.schema_id,
            columns,
        })
    }
}

fn data_type_from_json(type_json: &TypeJson) -> Result<DataType, String> {
    match type_json {
        TypeJson::Primitive(name) => primitive_data_type(name),
        TypeJson::Nested(nested) => match nested.as_ref() {
            NestedTypeJson::Struct { fields } => {
                let mut children = Vec::with_capacity(fields.len());
                for field in fields {
                    children.push(child_field(
                        field.id,
                        &field.name,
                        &field.field_type,
                        field.required,
                    )?);
                }
                Ok(DataType::Struct(Fields::from(children)))
            }
            NestedTypeJson::List {
                element_id,
                element,
                element_required,
            } => Ok(DataType::List(Arc::new(child_field(
                *element_id,
                "element",
                element,
                *element_required,
            )?))),
            NestedTypeJson::Map {
                key_id,
                key,
                value_id,
                value,
                value_required,
            } => {
                let entries = Fields::from(vec![
                    child_field(*key_id, "key", key, true)?,
                    child_field(*value_id, "value", value, *value_required)?,
                ]);
                Ok(DataType::Map(
                    Arc::new(Field::new(
                        "key_value",
                        DataType::Struct(entries),
                        false,
                    )),
                    false,
                ))
            }
        },
    }
}

fn child_field(
    field_id: i32,
    name: &str,
    type_json: &TypeJson,
    required: bool,
) -> Result<Field, String> {
    let data_type = data_type_from_json(type_json)?;
    Ok(Field::new(name, data_type, !required).with_metadata(HashMap::from([(
        "iceberg.field-id".to_string(),
        field_id.to_string(),
    )])))
}

fn primitive_data_type(name: &str) -> Result<DataType, String> {
    Ok(match name {
        "boolean" => DataType::Boolean,
        "int" => DataType::Int32,
        "long" => DataType::Int64,
        "float" => DataType::Float32,
        "double" => DataType::Float64,
        "date" => DataType::Date32,
        "time" => DataType::Time64(TimeUnit::Microsecond),
        "timestamp" => DataType::Timestamp(TimeUnit::Microsecond, None),
        "timestamptz" => DataType::Timestamp(TimeUnit::Microsecond, Some("+00:00".into())),
        "string" => DataType::Utf8,
        "uuid" => DataType::FixedSizeBinary(16),
        "binary" => DataType::Binary,
        _ => {
            if let Some(size) = name
                .strip_prefix("fixed[")
                .and_then(|rest| rest.strip_suffix(']'))
                .and_then(|n| n.parse::<i32>().ok())
            {
                DataType::FixedSizeBinary(size)
            } else if let Some(args) = name
                .strip_prefix("decimal(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                let mut parts = args.split(',').map(str::trim);
                let precision: u8 = parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| format!("invalid decimal type '{name}'"))?;
                let scale: i8 = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| format!("invalid decimal type '{name}'"))?;
                DataType::Decimal128(precision, scale)
            } else {
                return Err(format!("unknown primitive type '{name}'"));
            }
        }
    })
}
