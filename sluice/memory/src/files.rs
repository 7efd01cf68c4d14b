//! Reading staged CSV and JSON files for bulk loads.

use sluice_schemas::{FileFormat, ScalarValue, StagedFiles};
use tracing::debug;

use crate::error::MemoryError;
use crate::table::StoredRow;

/// Rows of every staged file, restricted to `fields`
pub(crate) fn read_staged_files(
    files: &StagedFiles,
    fields: &[String],
) -> Result<Vec<StoredRow>, MemoryError> {
    let mut rows = Vec::new();
    for path in &files.paths {
        let content = std::fs::read_to_string(path).map_err(|source| MemoryError::Io {
            path: path.clone(),
            source,
        })?;
        let loaded = match files.format {
            FileFormat::Csv => read_csv(&content)?,
            FileFormat::Json => read_json(&content)?,
        };
        debug!("Read {} rows from {path}", loaded.len());
        rows.extend(loaded);
    }

    Ok(rows
        .into_iter()
        .map(|mut row| {
            fields
                .iter()
                .map(|field| (field.clone(), row.remove(field).unwrap_or_default()))
                .collect()
        })
        .collect())
}

/// Empty cells are loaded as `NULL`
fn read_csv(content: &str) -> Result<Vec<StoredRow>, MemoryError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| {
                let value = if cell.is_empty() {
                    ScalarValue::Null
                } else {
                    ScalarValue::from(cell)
                };
                (header.to_string(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Accepts a JSON array of objects or one object per line
fn read_json(content: &str) -> Result<Vec<StoredRow>, MemoryError> {
    let objects: Vec<serde_json::Map<String, serde_json::Value>> =
        if content.trim_start().starts_with('[') {
            serde_json::from_str(content)?
        } else {
            content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(serde_json::from_str)
                .collect::<Result<_, _>>()?
        };

    Ok(objects
        .into_iter()
        .map(|object| {
            object
                .into_iter()
                .map(|(key, value)| (key, ScalarValue::from(value)))
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_csv_with_empty_cells_as_null() {
        let rows = read_csv("id,name\n1,a\n2,\n").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], ScalarValue::from("1"));
        assert_eq!(rows[1]["name"], ScalarValue::Null);
    }

    #[test]
    fn reads_json_arrays_and_lines() {
        let array = read_json(r#"[{"id": 1}, {"id": 2, "name": "b"}]"#).unwrap();
        let lines = read_json("{\"id\": 1}\n\n{\"id\": 2, \"name\": \"b\"}\n").unwrap();

        assert_eq!(array, lines);
        assert_eq!(array[1]["name"], ScalarValue::from("b"));
    }
}
