use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use sluice::prelude::*;
use sluice::schemas::IngestConfig;
use std::{collections::HashMap, error::Error, path::Path, path::PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod memory_exec;

/// Sluice CLI for validating, planning and locally applying ingestions
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check an ingest configuration without planning it
    Validate {
        /// Path to the ingest configuration file
        #[arg(short, long)]
        file: PathBuf,

        /// k=v list of parameters to pass to the configuration file
        /// e.g. sluice validate -f ingest.yml -p table=orders -p db=analytics
        #[arg(short, long, value_parser = parse_key_val::<String, String>)]
        params: Option<Vec<(String, String)>>,
    },

    /// Print the plans compiled from an ingest configuration as JSON
    Plan {
        /// Path to the ingest configuration file
        #[arg(short, long)]
        file: PathBuf,

        /// k=v list of parameters to pass to the configuration file
        #[arg(short, long, value_parser = parse_key_val::<String, String>)]
        params: Option<Vec<(String, String)>>,

        /// Plan the batch as if staging were empty
        #[arg(long)]
        empty_batch: bool,
    },

    /// Apply an ingestion to in-memory datasets and print its results
    Apply {
        /// Path to the ingest configuration file
        #[arg(short, long)]
        file: PathBuf,

        /// k=v list of parameters to pass to the configuration file
        #[arg(short, long, value_parser = parse_key_val::<String, String>)]
        params: Option<Vec<(String, String)>>,

        /// JSON files with the staging rows of each batch, applied in order
        #[arg(short, long)]
        batch: Vec<PathBuf>,

        /// Only check the staged files of a bulk load against main
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_key_val<T, U>(s: &str) -> Result<(T, U), Box<dyn Error + Send + Sync + 'static>>
where
    T: std::str::FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: std::str::FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

fn load_config(file: &Path, params: Option<Vec<(String, String)>>) -> Result<IngestConfig> {
    let params = HashMap::from_iter(params.unwrap_or_default());
    let format = format_from_path(file);
    debug!("Loading {format} configuration from {}", file.display());

    Ok(IngestConfig::from_file(file, format, params)?)
}

fn generator(config: &IngestConfig) -> Generator {
    Generator::builder()
        .mode(config.ingest_mode.clone())
        .options(config.options.clone())
        .build()
}

fn validate(file: &Path, params: Option<Vec<(String, String)>>) -> Result<()> {
    let config = load_config(file, params)?;
    let result = generator(&config).generate_operations(&config.datasets)?;

    info!(
        "Configuration is valid: {} ingestion of {} into {}",
        result.ingest_mode.name(),
        result.datasets.staging.name(),
        result.datasets.main.name()
    );
    for field in &result.datasets.main.schema.fields {
        debug!("Main field {}: {:?}", field.name, field.field_type.data_type);
    }
    Ok(())
}

fn plan(file: &Path, params: Option<Vec<(String, String)>>, empty_batch: bool) -> Result<()> {
    let config = load_config(file, params)?;
    let generator = generator(&config);
    let result = if empty_batch {
        generator.generate_operations_for_empty_batch(&config.datasets)?
    } else {
        generator.generate_operations(&config.datasets)?
    };

    let json = serde_json::to_string_pretty(&result).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Validate { file, params } => validate(&file, params)?,
        Commands::Plan {
            file,
            params,
            empty_batch,
        } => plan(&file, params, empty_batch)?,
        Commands::Apply {
            file,
            params,
            batch,
            dry_run,
        } => {
            let config = load_config(&file, params)?;
            if dry_run {
                memory_exec::dry_run(config).await?;
            } else {
                memory_exec::apply(config, &batch).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("table=orders", ("table", "orders"))]
    #[case("filter=a=b", ("filter", "a=b"))]
    #[case("empty=", ("empty", ""))]
    fn parses_parameters(#[case] raw: &str, #[case] expected: (&str, &str)) {
        let (key, value) = parse_key_val::<String, String>(raw).unwrap();
        assert_eq!((key.as_str(), value.as_str()), expected);
    }

    #[test]
    fn rejects_parameters_without_value() {
        assert!(parse_key_val::<String, String>("table").is_err());
    }

    #[test]
    fn loads_configuration_with_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ingest.yml");
        std::fs::write(
            &file,
            r#"
ingest_mode:
  type: append_only
datasets:
  main:
    name: "${table}"
  staging:
    name: staging
"#,
        )
        .unwrap();

        let config = load_config(
            &file,
            Some(vec![("table".to_string(), "orders".to_string())]),
        )
        .unwrap();
        assert_eq!(config.datasets.main.name(), "orders");

        assert!(load_config(&file, None).is_err());
    }
}
