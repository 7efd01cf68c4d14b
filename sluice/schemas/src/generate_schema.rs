//! Binary to generate JSON schema for the ingestion configuration
//!
//! This binary can be run with: cargo run --bin generate_schema --features schema_gen

use schemars::schema_for;
use sluice_schemas::IngestConfig;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = schema_for!(IngestConfig);
    let schema_json = serde_json::to_string_pretty(&schema)?;

    // json_schema/ next to the workspace manifest
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let root = manifest_dir
        .ancestors()
        .nth(2)
        .ok_or("crate is not nested in a workspace")?;
    let output_path = root.join("json_schema").join("sluice.schema.json");

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&output_path)?;
    file.write_all(schema_json.as_bytes())?;

    println!("Generated JSON schema at: {}", output_path.display());

    Ok(())
}
