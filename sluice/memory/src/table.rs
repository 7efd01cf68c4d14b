use sluice_schemas::{DataType, Field, ScalarValue};
use std::collections::BTreeMap;

use crate::error::MemoryError;
use crate::eval::Row;

/// Stored row, keyed by column name
pub type StoredRow = BTreeMap<String, ScalarValue>;

/// Rows of one dataset together with its columns.
///
/// Values are coerced to the column type on write, so numbers loaded from text files
/// compare as numbers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub name: String,
    pub fields: Vec<Field>,
    pub rows: Vec<StoredRow>,
}

impl Table {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
            rows: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Rows with their columns in table order
    pub(crate) fn scan(&self) -> Vec<Row> {
        self.rows.iter().map(|row| self.ordered(row)).collect()
    }

    pub(crate) fn ordered(&self, row: &StoredRow) -> Row {
        self.fields
            .iter()
            .map(|field| {
                let value = row.get(&field.name).cloned().unwrap_or_default();
                (field.name.clone(), value)
            })
            .collect()
    }

    /// Coerces `row` to the table's columns, failing on missing non-nullable values
    pub(crate) fn conform(&self, mut row: StoredRow) -> Result<StoredRow, MemoryError> {
        let mut conformed = StoredRow::new();
        for field in &self.fields {
            let value = coerce(
                row.remove(&field.name).unwrap_or_default(),
                field.field_type.data_type,
            );
            if value.is_null() && !field.nullable {
                return Err(MemoryError::NotNullable {
                    table: self.name.clone(),
                    column: field.name.clone(),
                });
            }
            conformed.insert(field.name.clone(), value);
        }
        Ok(conformed)
    }

    pub(crate) fn insert(&mut self, row: StoredRow) -> Result<(), MemoryError> {
        let row = self.conform(row)?;
        self.rows.push(row);
        Ok(())
    }

    pub(crate) fn change_type(&mut self, field: &Field) {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == field.name) {
            existing.field_type = field.field_type;
        }
        let data_type = field.field_type.data_type;
        for row in &mut self.rows {
            if let Some(value) = row.remove(&field.name) {
                row.insert(field.name.clone(), coerce(value, data_type));
            }
        }
    }
}

/// Converts text to the column type; text that does not parse is kept as is
pub(crate) fn coerce(value: ScalarValue, data_type: DataType) -> ScalarValue {
    use DataType::*;

    match (value, data_type) {
        (ScalarValue::String(text), TinyInt | SmallInt | Int | BigInt) => {
            match text.trim().parse::<i64>() {
                Ok(number) => ScalarValue::Int(number),
                Err(_) if text.trim().is_empty() => ScalarValue::Null,
                Err(_) => ScalarValue::String(text),
            }
        }
        (ScalarValue::String(text), Float | Double | Decimal) => {
            match text.trim().parse::<f64>() {
                Ok(number) => ScalarValue::Float(number),
                Err(_) if text.trim().is_empty() => ScalarValue::Null,
                Err(_) => ScalarValue::String(text),
            }
        }
        (ScalarValue::String(text), Boolean) => match text.trim().to_lowercase().as_str() {
            "true" | "t" | "1" => ScalarValue::Boolean(true),
            "false" | "f" | "0" => ScalarValue::Boolean(false),
            "" => ScalarValue::Null,
            _ => ScalarValue::String(text),
        },
        (ScalarValue::Int(number), Float | Double | Decimal) => ScalarValue::Float(number as f64),
        (ScalarValue::Float(number), TinyInt | SmallInt | Int | BigInt) if number.fract() == 0.0 => {
            ScalarValue::Int(number as i64)
        }
        (value, _) => value,
    }
}
