use std::fs;
use std::path::Path;

use jsonschema::JSONSchema;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Static configuration record handed to every API client, immutable for
/// the lifetime of a submission.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(rename = "apibaseurl")]
    pub api_base_url: String,
    #[serde(rename = "apikey")]
    pub api_key: String,
    pub license_server: String,
    pub project_code: String,
    pub software: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read configuration at {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("configuration is not valid JSON: {0}")]
    Decode(serde_json::Error),
    #[error("configuration fails schema validation")]
    Validation,
    #[error("configuration is malformed: {0}")]
    Deserialise(serde_json::Error),
    #[error("apibaseurl is not a valid URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// Read the configuration file, check it against the embedded schema, and
/// deserialise it into typed settings.
///
/// A single trailing slash on the base URL is stripped so endpoint paths
/// can always be appended verbatim.
pub fn load(path: &Path) -> Result<Settings, ConfigError> {
    info!("Reading configuration at {}", path.display());
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let json: Value = serde_json::from_str(&raw).map_err(ConfigError::Decode)?;
    validate(&json)?;

    let mut settings: Settings = serde_json::from_value(json).map_err(ConfigError::Deserialise)?;
    if settings.api_base_url.ends_with('/') {
        settings.api_base_url.pop();
    }
    Url::parse(&settings.api_base_url)?;

    Ok(settings)
}

/// Validate the raw record before deserialising it
fn validate(json: &Value) -> Result<(), ConfigError> {
    match compiled_schema().validate(json) {
        Ok(_) => Ok(()),
        Err(_) => {
            warn!("Configuration fails schema validation");
            Err(ConfigError::Validation)
        }
    }
}

fn compiled_schema() -> JSONSchema {
    /// included configuration schema (static)
    static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/config.json"));
    let json: Value = serde_json::from_str(SCHEMA).expect("Valid JSON");
    JSONSchema::compile(&json).expect("Valid schema")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("config_miscellaneous.json");
        let mut file = fs::File::create(&path).expect("config file");
        file.write_all(content.as_bytes()).expect("written");
        (dir, path)
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let (_dir, path) = write_config(
            r#"{"apibaseurl": "https://x.test/", "apikey": "k",
                "license_server": "27000@host", "project_code": "P1",
                "software": "starccmp+"}"#,
        );
        let settings = load(&path).expect("valid configuration");
        assert_eq!(settings.api_base_url, "https://x.test");
        assert_eq!(settings.api_key, "k");
        assert_eq!(settings.software, "starccmp+");
    }

    #[test]
    fn missing_keys_fail_schema_validation() {
        let (_dir, path) = write_config(r#"{"apibaseurl": "https://x.test"}"#);
        assert!(matches!(load(&path), Err(ConfigError::Validation)));
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        let (_dir, path) = write_config("not json");
        assert!(matches!(load(&path), Err(ConfigError::Decode(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("nope.json");
        assert!(matches!(load(&missing), Err(ConfigError::Read { .. })));
    }
}
