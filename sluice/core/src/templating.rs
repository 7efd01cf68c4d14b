use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::{collections::HashMap, path::Path};

use miette::{Diagnostic, NamedSource, SourceOffset, SourceSpan};
use regex::Regex;
use sluice_schemas::IngestConfig;
use tracing::debug;

#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum TemplateError {
    #[error("Ingest config file not found: '{file_path}'")]
    #[diagnostic(
        code(sluice::template::file_not_found),
        help("Check that the file path is correct and the file exists")
    )]
    NotFound {
        #[source]
        source: std::io::Error,
        file_path: String,
    },

    #[error("Unsupported configuration format: '{0}'")]
    #[diagnostic(
        code(sluice::template::unknown_format),
        help(
            "The configuration format '{0}' is not supported in this build.\n\
             \n\
             Available formats in this build:\n\
             {}\n\
             \n\
             To enable additional formats, rebuild with the appropriate feature flag:\n\
             • For JSON: --features json\n\
             • For YAML: --features yaml\n\
             • For TOML: --features toml",
            Self::available_formats()
        )
    )]
    UnknownFormat(TemplateFormat),

    #[error("Missing template parameters: {0:?}")]
    #[diagnostic(
        code(sluice::template::missing_params),
        help(
            "Provide the missing parameters using the -p flag.\n\
              \n\
              Example:\n\
              sluice plan -f ingest.yaml -p database=sales -p staging=orders_batch"
        )
    )]
    MissingParams(HashSet<String>),

    #[cfg(feature = "json")]
    #[error("JSON parsing error")]
    #[diagnostic(code(sluice::template::json_parse_error))]
    ParseJson {
        #[source_code]
        source_code: Arc<NamedSource<String>>,
        #[label("{}", error)]
        span: SourceSpan,
        #[source]
        error: serde_json::Error,
    },

    #[cfg(feature = "yaml")]
    #[error("YAML parsing error")]
    #[diagnostic(code(sluice::template::yaml_parse_error))]
    ParseYaml {
        #[source_code]
        source_code: Arc<NamedSource<String>>,
        #[label("{}", error)]
        span: SourceSpan,
        #[source]
        error: serde_yml::Error,
    },

    #[cfg(feature = "toml")]
    #[error(transparent)]
    #[diagnostic(code(sluice::template::toml_serialize_error))]
    ParseSerToml(#[from] toml::ser::Error),

    #[cfg(feature = "toml")]
    #[error("TOML parsing error")]
    #[diagnostic(code(sluice::template::toml_parse_error))]
    ParseDeToml {
        #[source_code]
        source_code: Arc<NamedSource<String>>,
        #[label("{}", error)]
        span: SourceSpan,
        #[source]
        error: toml::de::Error,
    },

    #[error("Unsupported config version '{0}'")]
    #[diagnostic(
        code(sluice::template::unsupported_version),
        help("Supported config versions: v1")
    )]
    UnsupportedVersion(String),
}

impl TemplateError {
    fn available_formats() -> String {
        let mut formats = vec![];

        #[cfg(feature = "json")]
        formats.push("• JSON (.json)");

        #[cfg(feature = "yaml")]
        formats.push("• YAML (.yaml, .yml)");

        #[cfg(feature = "toml")]
        formats.push("• TOML (.toml)");

        if formats.is_empty() {
            "No formats are currently enabled".to_string()
        } else {
            formats.join("\n")
        }
    }
}

/// Serialization format of an ingest configuration.
///
/// The format is typically inferred from the file extension, see [`format_from_path`].
#[derive(Debug, Clone)]
pub enum TemplateFormat {
    /// JSON format (.json files)
    Json,
    /// TOML format (.toml files)
    Toml,
    /// YAML format (.yml or .yaml files)
    Yaml,
    /// Unknown or unsupported format
    Unknown(String),
}

impl std::fmt::Display for TemplateFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateFormat::Json => write!(f, "json"),
            TemplateFormat::Toml => write!(f, "toml"),
            TemplateFormat::Yaml => write!(f, "yaml"),
            TemplateFormat::Unknown(format) => write!(f, "{format}"),
        }
    }
}

/// Loads ingest configurations from files or strings with parameter substitution.
///
/// # Template Parameters
///
/// Configurations may contain parameters using the `${parameter_name}` syntax, e.g. to
/// point the same definition at a different database per environment. Parameters are
/// substituted at load time and loading fails if any parameter is left without a value.
///
/// # Examples
///
/// ```
/// use sluice_core::templating::{TemplateFormat, TemplateLoader};
/// use sluice_schemas::IngestConfig;
/// use std::collections::HashMap;
///
/// let yaml = r#"
/// ingest_mode:
///   type: append_only
/// datasets:
///   main:
///     name: "${table}"
///   staging:
///     name: staging
/// "#;
///
/// let params = HashMap::from([("table".to_string(), "orders".to_string())]);
/// let config = IngestConfig::from_str(yaml, TemplateFormat::Yaml, params).unwrap();
/// assert_eq!(config.datasets.main.name(), "orders");
/// ```
pub trait TemplateLoader: Sized {
    /// Load a configuration from a file in the given format
    fn from_file<P: AsRef<Path>>(
        path: P,
        format: TemplateFormat,
        params: HashMap<String, String>,
    ) -> Result<Self, TemplateError>;

    /// Load a configuration from a string in the given format
    fn from_str<T: AsRef<str>>(
        value: T,
        format: TemplateFormat,
        params: HashMap<String, String>,
    ) -> Result<Self, TemplateError>;

    /// Replaces every `${parameter_name}` with its value from `params`.
    ///
    /// Fails with the names of all parameters that have no value.
    fn substitute_params(
        raw: &str,
        params: HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        static PARAM_REGEX: OnceLock<Regex> = OnceLock::new();
        let mut definition = raw.to_string();

        params.into_iter().for_each(|(name, value)| {
            let template = format!("${{{name}}}");
            definition = definition.replace(template.as_str(), value.as_str());
        });

        let missing_params = PARAM_REGEX
            .get_or_init(|| Regex::new("\\$\\{([a-zA-Z0-9_]+)\\}").expect("invalid regex"))
            .captures_iter(definition.as_str())
            .filter_map(|capture| capture.get(1))
            .map(|param| param.as_str().to_string())
            .collect::<HashSet<String>>();

        if !missing_params.is_empty() {
            return Err(TemplateError::MissingParams(missing_params));
        }

        Ok(definition)
    }
}

impl TemplateLoader for IngestConfig {
    fn from_file<T: AsRef<Path>>(
        path: T,
        format: TemplateFormat,
        params: HashMap<String, String>,
    ) -> Result<IngestConfig, TemplateError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| TemplateError::NotFound {
            source: e,
            file_path: path.display().to_string(),
        })?;
        Self::from_str(contents, format, params)
    }

    fn from_str<T: AsRef<str>>(
        value: T,
        format: TemplateFormat,
        params: HashMap<String, String>,
    ) -> Result<IngestConfig, TemplateError> {
        let contents = value.as_ref();

        debug!("Parsing template with format: {format:?}");

        let config = match format {
            TemplateFormat::Toml => {
                #[cfg(feature = "toml")]
                {
                    debug!("Parsing TOML string");
                    let parsed = toml::from_str::<toml::Value>(contents).map_err(|error| {
                        let offset = match error.span() {
                            Some(span) => SourceOffset::from(span.start),
                            None => SourceOffset::from(0),
                        };
                        TemplateError::ParseDeToml {
                            source_code: Arc::new(NamedSource::new(
                                "ingest.toml",
                                contents.to_string(),
                            )),
                            span: SourceSpan::new(offset, 1),
                            error,
                        }
                    })?;
                    let parsed = toml::to_string(&parsed).map_err(TemplateError::ParseSerToml)?;
                    let definition = Self::substitute_params(parsed.as_str(), params)?;
                    toml::from_str::<IngestConfig>(definition.as_str()).map_err(|error| {
                        let offset = match error.span() {
                            Some(span) => SourceOffset::from(span.start),
                            None => SourceOffset::from(0),
                        };
                        TemplateError::ParseDeToml {
                            source_code: Arc::new(NamedSource::new(
                                "ingest.toml",
                                definition.clone(),
                            )),
                            span: SourceSpan::new(offset, 1),
                            error,
                        }
                    })?
                }
                #[cfg(not(feature = "toml"))]
                {
                    return Err(TemplateError::UnknownFormat(TemplateFormat::Toml));
                }
            }
            TemplateFormat::Json => {
                #[cfg(feature = "json")]
                {
                    debug!("Parsing JSON string");
                    let parsed =
                        serde_json::from_str::<serde_json::Value>(contents).map_err(|error| {
                            let offset =
                                SourceOffset::from_location(contents, error.line(), error.column());
                            TemplateError::ParseJson {
                                source_code: Arc::new(NamedSource::new(
                                    "ingest.json",
                                    contents.to_string(),
                                )),
                                span: SourceSpan::new(offset, 1),
                                error,
                            }
                        })?;
                    let parsed = serde_json::to_string(&parsed).map_err(|error| {
                        TemplateError::ParseJson {
                            source_code: Arc::new(NamedSource::new(
                                "ingest.json",
                                contents.to_string(),
                            )),
                            span: SourceSpan::new(0.into(), contents.len()),
                            error,
                        }
                    })?;
                    let definition = Self::substitute_params(parsed.as_str(), params)?;
                    serde_json::from_str::<IngestConfig>(definition.as_str()).map_err(|error| {
                        let offset =
                            SourceOffset::from_location(&definition, error.line(), error.column());
                        TemplateError::ParseJson {
                            source_code: Arc::new(NamedSource::new(
                                "ingest.json",
                                definition.clone(),
                            )),
                            span: SourceSpan::new(offset, 1),
                            error,
                        }
                    })?
                }
                #[cfg(not(feature = "json"))]
                {
                    return Err(TemplateError::UnknownFormat(TemplateFormat::Json));
                }
            }
            TemplateFormat::Yaml => {
                #[cfg(feature = "yaml")]
                {
                    debug!("Parsing YAML string");
                    let parsed =
                        serde_yml::from_str::<serde_yml::Value>(contents).map_err(|error| {
                            let offset = match error.location() {
                                Some(location) => SourceOffset::from_location(
                                    contents,
                                    location.line(),
                                    location.column(),
                                ),
                                None => SourceOffset::from(0),
                            };
                            TemplateError::ParseYaml {
                                source_code: Arc::new(NamedSource::new(
                                    "ingest.yaml",
                                    contents.to_string(),
                                )),
                                span: SourceSpan::new(offset, 1),
                                error,
                            }
                        })?;
                    let parsed = serde_yml::to_string(&parsed).map_err(|error| {
                        TemplateError::ParseYaml {
                            source_code: Arc::new(NamedSource::new(
                                "ingest.yaml",
                                contents.to_string(),
                            )),
                            span: SourceSpan::new(0.into(), contents.len()),
                            error,
                        }
                    })?;
                    let definition = Self::substitute_params(parsed.as_str(), params)?;
                    serde_yml::from_str::<IngestConfig>(definition.as_str()).map_err(|error| {
                        let offset = match error.location() {
                            Some(location) => SourceOffset::from_location(
                                &definition,
                                location.line(),
                                location.column(),
                            ),
                            None => SourceOffset::from(0),
                        };
                        TemplateError::ParseYaml {
                            source_code: Arc::new(NamedSource::new(
                                "ingest.yaml",
                                definition.clone(),
                            )),
                            span: SourceSpan::new(offset, 1),
                            error,
                        }
                    })?
                }
                #[cfg(not(feature = "yaml"))]
                {
                    return Err(TemplateError::UnknownFormat(TemplateFormat::Yaml));
                }
            }
            fmt @ TemplateFormat::Unknown(_) => return Err(TemplateError::UnknownFormat(fmt)),
        };

        if config.version != "v1" {
            return Err(TemplateError::UnsupportedVersion(config.version));
        }

        Ok(config)
    }
}

pub fn format_from_path<P: AsRef<Path>>(path: P) -> TemplateFormat {
    let path = path.as_ref();
    let ext = path.extension().and_then(|s| s.to_str());

    match ext {
        Some("toml") => TemplateFormat::Toml,
        Some("json") => TemplateFormat::Json,
        Some("yml") | Some("yaml") => TemplateFormat::Yaml,
        ext => TemplateFormat::Unknown(ext.unwrap_or("unknown_ext").to_string()),
    }
}
