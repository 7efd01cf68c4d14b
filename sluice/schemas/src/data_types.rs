//! Relational column types shared by every dataset definition.
//!
//! Types are dialect-agnostic; sinks decide which conversions between them they support.

use crate::serde_helpers::{default_true, RawFieldType};
use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A column definition of a dataset schema.
///
/// Fields are identified by name within a schema.
///
/// # Examples
///
/// ```
/// use sluice_schemas::{DataType, Field, FieldType};
/// use std::str::FromStr;
///
/// let id = Field::new("id", DataType::Int).with_primary_key();
/// assert!(id.primary_key);
/// assert!(!id.nullable);
///
/// let name = Field::builder()
///     .name("name".to_string())
///     .field_type(FieldType::from_str("varchar(64)").unwrap())
///     .build();
/// assert_eq!(name.field_type.length, Some(64));
/// assert!(name.nullable);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub struct Field {
    /// The name of the field
    pub name: String,

    /// The type of the field
    /// Can be specified as a string (e.g. "bigint", "varchar(64)", "decimal(10,2)")
    /// or as an object with `data_type`, `length` and `scale`
    #[serde(rename = "type", alias = "data_type")]
    #[cfg_attr(
        feature = "schema_gen",
        schemars(
            with = "String",
            description = "Type specification. Examples: 'int', 'bigint', 'varchar(64)', 'decimal(10,2)', 'timestamp'"
        )
    )]
    pub field_type: FieldType,

    /// Whether the field is part of the primary key
    #[serde(default)]
    #[builder(default)]
    pub primary_key: bool,

    /// Whether the field can contain null values
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub nullable: bool,
}

impl Field {
    /// Nullable, non-key field
    pub fn new(name: impl Into<String>, field_type: impl Into<FieldType>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            primary_key: false,
            nullable: true,
        }
    }

    /// Marks the field as primary key, which also makes it non-nullable
    pub fn with_primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_field_type(mut self, field_type: impl Into<FieldType>) -> Self {
        self.field_type = field_type.into();
        self
    }
}

/// A data type together with its optional sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldType {
    pub data_type: DataType,
    pub length: Option<u32>,
    pub scale: Option<u32>,
}

impl FieldType {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            length: None,
            scale: None,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }
}

impl From<DataType> for FieldType {
    fn from(data_type: DataType) -> Self {
        FieldType::new(data_type)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.length, self.scale) {
            (Some(length), Some(scale)) => write!(f, "{}({length},{scale})", self.data_type),
            (Some(length), None) => write!(f, "{}({length})", self.data_type),
            _ => write!(f, "{}", self.data_type),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let Some(start) = s.find('(') else {
            return Ok(FieldType::new(DataType::from_str(s)?));
        };

        let end = s
            .rfind(')')
            .filter(|end| *end > start)
            .ok_or_else(|| format!("unbalanced parentheses in type '{s}'"))?;

        let data_type = DataType::from_str(&s[..start])?;
        let params = s[start + 1..end]
            .split(',')
            .map(|param| {
                param
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| format!("invalid size '{}' in type '{s}': {e}", param.trim()))
            })
            .collect::<Result<Vec<u32>, String>>()?;

        match params.as_slice() {
            [length] => Ok(FieldType::new(data_type).with_length(*length)),
            [length, scale] => Ok(FieldType::new(data_type)
                .with_length(*length)
                .with_scale(*scale)),
            _ => Err(format!(
                "type '{s}' takes 1 or 2 size parameters, got {}",
                params.len()
            )),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        match RawFieldType::deserialize(deserializer)? {
            RawFieldType::Text(text) => FieldType::from_str(&text)
                .map_err(|e| D::Error::custom(format!("Invalid field type: {e}"))),
            RawFieldType::Object {
                data_type,
                length,
                scale,
            } => {
                let data_type = DataType::from_str(&data_type)
                    .map_err(|e| D::Error::custom(format!("Invalid data type: {e}")))?;
                Ok(FieldType {
                    data_type,
                    length,
                    scale,
                })
            }
        }
    }
}

/// Dialect-agnostic relational data type.
///
/// # Examples
///
/// ```
/// use sluice_schemas::DataType;
/// use std::str::FromStr;
///
/// assert_eq!(DataType::from_str("BIGINT").unwrap(), DataType::BigInt);
/// assert_eq!(DataType::from_str("text").unwrap(), DataType::String);
/// assert_eq!(DataType::Varchar.to_string(), "varchar");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Decimal,
    Float,
    Double,
    Boolean,
    Char,
    Varchar,
    String,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    DateTime,
    Binary,
    Json,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::TinyInt
                | DataType::SmallInt
                | DataType::Int
                | DataType::BigInt
                | DataType::Decimal
                | DataType::Float
                | DataType::Double
        )
    }

    pub fn is_text(&self) -> bool {
        matches!(self, DataType::Char | DataType::Varchar | DataType::String)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            DataType::Date
                | DataType::Time
                | DataType::Timestamp
                | DataType::TimestampTz
                | DataType::DateTime
        )
    }

    /// Whether MIN/MAX and range comparisons are meaningful for values of this type
    pub fn is_orderable(&self) -> bool {
        self.is_numeric() || self.is_text() || self.is_temporal()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::TinyInt => "tinyint",
            DataType::SmallInt => "smallint",
            DataType::Int => "int",
            DataType::BigInt => "bigint",
            DataType::Decimal => "decimal",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Boolean => "boolean",
            DataType::Char => "char",
            DataType::Varchar => "varchar",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Timestamp => "timestamp",
            DataType::TimestampTz => "timestamp_tz",
            DataType::DateTime => "datetime",
            DataType::Binary => "binary",
            DataType::Json => "json",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tinyint" | "int8" => Ok(DataType::TinyInt),
            "smallint" | "int16" => Ok(DataType::SmallInt),
            "int" | "integer" | "int32" => Ok(DataType::Int),
            "bigint" | "long" | "int64" => Ok(DataType::BigInt),
            "decimal" | "numeric" => Ok(DataType::Decimal),
            "float" | "real" | "float32" => Ok(DataType::Float),
            "double" | "float64" => Ok(DataType::Double),
            "bool" | "boolean" => Ok(DataType::Boolean),
            "char" => Ok(DataType::Char),
            "varchar" => Ok(DataType::Varchar),
            "string" | "text" | "utf8" => Ok(DataType::String),
            "date" => Ok(DataType::Date),
            "time" => Ok(DataType::Time),
            "timestamp" | "timestamp_ntz" => Ok(DataType::Timestamp),
            "timestamp_tz" | "timestamptz" => Ok(DataType::TimestampTz),
            "datetime" => Ok(DataType::DateTime),
            "binary" | "varbinary" => Ok(DataType::Binary),
            "json" | "variant" => Ok(DataType::Json),
            other => Err(format!("unknown data type '{other}'")),
        }
    }
}
