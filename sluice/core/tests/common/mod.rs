//! Configuration fixtures shared by the core integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// Unitemporal delta of `${table}` with filtered duplicates and a delete indicator
pub const ORDERS_YAML: &str = r#"
ingest_mode:
  type: unitemporal_delta
  digest_field: digest
  transaction_milestoning:
    type: batch_id
    batch_id_in: batch_id_in
    batch_id_out: batch_id_out
  merge_strategy:
    type: delete_indicator
    delete_field: op
    delete_values: ["D"]
  deduplication: filter_duplicates
datasets:
  main:
    name: "${table}"
  staging:
    name: "${table}_staging"
    schema:
      fields:
        - { name: id, type: int, primary_key: true }
        - { name: amount, type: bigint }
        - { name: digest, type: varchar }
        - { name: op, type: varchar(1) }
"#;

/// Writes `content` to `name` inside `dir`
pub fn write_config(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
