//! # Config Loading
//!
//! Reads the configuration document from a file or stdin, parses it as YAML
//! or JSON, and runs the structural checks before anything is built.

use krill_types::{ConfigDocument, ConfigError};
use std::io::Read;
use std::path::PathBuf;
use thiserror::Error;

/// Where the document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Stdin,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Stdin => write!(f, "<stdin>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read config from {source_name}: {error}")]
    Read {
        source_name: String,
        error: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] ConfigError),

    #[error("Config has {} problem(s): {}", .0.len(), join(.0))]
    Invalid(Vec<ConfigError>),
}

fn join(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Read, parse and validate a document.
pub fn load(source: &ConfigSource, format: ConfigFormat) -> Result<ConfigDocument, LoadError> {
    let text = read(source).map_err(|error| LoadError::Read {
        source_name: source.to_string(),
        error,
    })?;
    parse(&text, format)
}

/// Parse and validate document text.
pub fn parse(text: &str, format: ConfigFormat) -> Result<ConfigDocument, LoadError> {
    let document = match format {
        ConfigFormat::Yaml => ConfigDocument::from_yaml_str(text)?,
        ConfigFormat::Json => ConfigDocument::from_json_str(text)?,
    };
    document.validate().map_err(LoadError::Invalid)?;
    Ok(document)
}

fn read(source: &ConfigSource) -> std::io::Result<String> {
    match source {
        ConfigSource::File(path) => std::fs::read_to_string(path),
        ConfigSource::Stdin => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
log_level: debug
ports:
  metrics: 9100
simulation:
  brokers:
    - name: b1
  topics:
    - name: t1
      broker: b1
"#;

    #[test]
    fn test_parse_yaml() {
        let document = parse(YAML, ConfigFormat::Yaml).unwrap();
        assert_eq!(document.log_level, "debug");
        assert_eq!(document.ports.metrics, 9100);
        assert_eq!(document.simulation.topics.len(), 1);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"simulation": {"brokers": [{"name": "b1"}]}}"#;
        let document = parse(json, ConfigFormat::Json).unwrap();
        assert_eq!(document.log_level, "info");
        assert_eq!(document.simulation.brokers[0].name, "b1");

        assert!(matches!(
            parse(YAML, ConfigFormat::Json),
            Err(LoadError::Parse(ConfigError::Parse(_)))
        ));
    }

    #[test]
    fn test_structural_errors_reported_together() {
        let yaml = r#"
simulation:
  sites:
    - name: ""
  limiters:
    - name: l1
      rate: 0
      burst: 0
"#;
        let err = parse(yaml, ConfigFormat::Yaml).unwrap_err();
        let LoadError::Invalid(errors) = &err else {
            panic!("expected structural errors, got {err}");
        };
        assert!(errors.len() >= 2);
        assert!(err.to_string().starts_with(&format!("Config has {} problem(s)", errors.len())));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let source = ConfigSource::File(file.path().to_path_buf());
        let document = load(&source, ConfigFormat::Yaml).unwrap();
        assert_eq!(document.simulation.brokers.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let source = ConfigSource::File(PathBuf::from("/nonexistent/krill.yml"));
        let err = load(&source, ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/krill.yml"));
    }
}
