//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Sweep configuration: every service is driven at every concurrency level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub services: Vec<ServiceConfig>,
    pub concurrent_users: Vec<u32>,
    pub requests_per_user: u32,
    /// Pause between two consecutive cells.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    /// Upper bound for one outbound call, connect and read included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: f64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: f64,
    /// Probe each service once before loading it.
    #[serde(default = "default_probe")]
    pub probe: bool,
}

/// One target service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub request_type: RequestType,
    /// Base JSON object for `json` services.
    #[serde(default)]
    pub request_body: Option<serde_json::Value>,
    /// Payload file for `binary` services.
    #[serde(default, alias = "image_path")]
    pub binary_path: Option<PathBuf>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

/// Payload kind sent to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    #[default]
    Json,
    #[serde(alias = "image")]
    Binary,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Json => "json",
            RequestType::Binary => "binary",
        }
    }
}

fn default_cooldown_secs() -> f64 {
    2.0
}

fn default_request_timeout_secs() -> f64 {
    30.0
}

fn default_probe_timeout_secs() -> f64 {
    5.0
}

fn default_probe() -> bool {
    true
}

impl LoadConfig {
    /// Load configuration from a file. `.json` files are parsed as JSON,
    /// anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> EngineResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> EngineResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| EngineError::config(format!("JSON error: {}", e)))
    }

    /// Validate configuration. Runs before any network traffic.
    pub fn validate(&self) -> EngineResult<()> {
        if self.services.is_empty() {
            return Err(EngineError::config("at least one service must be specified"));
        }
        if self.concurrent_users.is_empty() {
            return Err(EngineError::config(
                "concurrent_users must list at least one level",
            ));
        }
        if self.concurrent_users.contains(&0) {
            return Err(EngineError::config("every concurrent_users level must be > 0"));
        }
        if self.requests_per_user == 0 {
            return Err(EngineError::config("requests_per_user must be > 0"));
        }

        check_secs("cooldown_secs", self.cooldown_secs, true)?;
        check_secs("request_timeout_secs", self.request_timeout_secs, false)?;
        check_secs("probe_timeout_secs", self.probe_timeout_secs, false)?;

        for service in &self.services {
            service.validate()?;
        }
        Ok(())
    }

    /// Attempts issued for one cell at the given concurrency level.
    pub fn total_requests(&self, concurrency: u32) -> u64 {
        concurrency as u64 * self.requests_per_user as u64
    }

    pub fn cooldown(&self) -> Duration {
        secs_to_duration(self.cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        secs_to_duration(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        secs_to_duration(self.probe_timeout_secs)
    }
}

impl ServiceConfig {
    /// Shape checks that need no I/O. URL, header and asset checks happen
    /// when the [`crate::request::RequestSpec`] is built.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::config("service name must not be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(EngineError::config(format!(
                "service '{}': url must not be empty",
                self.name
            )));
        }

        match self.request_type {
            RequestType::Json => match &self.request_body {
                Some(serde_json::Value::Object(_)) => Ok(()),
                Some(_) => Err(EngineError::config(format!(
                    "service '{}': request_body must be a mapping",
                    self.name
                ))),
                None => Err(EngineError::config(format!(
                    "service '{}': json services need a request_body",
                    self.name
                ))),
            },
            RequestType::Binary => {
                if self.binary_path.is_none() {
                    return Err(EngineError::config(format!(
                        "service '{}': binary services need a binary_path",
                        self.name
                    )));
                }
                Ok(())
            }
        }
    }
}

fn check_secs(field: &str, value: f64, allow_zero: bool) -> EngineResult<()> {
    // rejects NaN, infinities, negatives and values past Duration::MAX
    let representable = Duration::try_from_secs_f64(value).is_ok();
    let ok = representable && (allow_zero || value > 0.0);
    if !ok {
        let bound = if allow_zero { ">= 0" } else { "> 0" };
        return Err(EngineError::config(format!(
            "{} must be {} and fit in a duration, got {}",
            field, bound, value
        )));
    }
    Ok(())
}

/// Zero for values `validate()` would reject.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
services:
  - name: echo
    url: http://127.0.0.1:9000/echo
    request_body:
      user: alice
concurrent_users: [1, 10]
requests_per_user: 20
"#;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let config = LoadConfig::from_yaml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].request_type, RequestType::Json);
        assert_eq!(config.cooldown(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.probe);
        assert_eq!(config.total_requests(10), 200);
    }

    #[test]
    fn test_json_document_with_image_alias() {
        let json = r#"{
            "services": [{
                "name": "ocr",
                "url": "http://127.0.0.1:9000/ocr",
                "request_type": "image",
                "image_path": "/tmp/sample.png",
                "headers": null
            }],
            "concurrent_users": [5],
            "requests_per_user": 3
        }"#;
        let config = LoadConfig::from_json_str(json).unwrap();
        config.validate().unwrap();

        let service = &config.services[0];
        assert_eq!(service.request_type, RequestType::Binary);
        assert_eq!(service.binary_path, Some(PathBuf::from("/tmp/sample.png")));
        assert!(service.headers.is_none());
    }

    #[test]
    fn test_levels_keep_order_and_duplicates() {
        let yaml = MINIMAL.replace("[1, 10]", "[10, 1, 10]");
        let config = LoadConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.concurrent_users, vec![10, 1, 10]);
    }

    #[test]
    fn test_validate_rejects_zero_level() {
        let yaml = MINIMAL.replace("[1, 10]", "[0, 10]");
        let config = LoadConfig::from_yaml_str(&yaml).unwrap();
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_validate_rejects_missing_body() {
        let yaml = r#"
services:
  - name: echo
    url: http://127.0.0.1:9000/echo
concurrent_users: [1]
requests_per_user: 1
"#;
        let config = LoadConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_body"));
    }

    #[test]
    fn test_validate_rejects_non_mapping_body() {
        let yaml = MINIMAL.replace("      user: alice", "      - alice");
        let config = LoadConfig::from_yaml_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_cooldown() {
        let mut config = LoadConfig::from_yaml_str(MINIMAL).unwrap();
        config.cooldown_secs = -1.0;
        assert!(config.validate().is_err());

        config.cooldown_secs = 0.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_reports_missing_file_as_config_error() {
        let err = LoadConfig::from_file("/nonexistent/load.yaml").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_bundled_sample_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/sample.yaml");
        let config = LoadConfig::from_file(path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[1].request_type, RequestType::Binary);
        assert_eq!(config.total_requests(20), 400);
    }

    #[test]
    fn test_validate_rejects_durations_out_of_range() {
        for field in ["cooldown_secs", "request_timeout_secs", "probe_timeout_secs"] {
            let yaml = format!("{}{}: 1e20\n", MINIMAL, field);
            let config = LoadConfig::from_yaml_str(&yaml).unwrap();
            let err = config.validate().unwrap_err();
            assert!(err.is_config());
            assert!(err.to_string().contains(field));

            // accessors never panic, even on unvalidated values
            let _ = (config.cooldown(), config.request_timeout(), config.probe_timeout());
            assert!(matches!(
                crate::orchestrator::RunOrchestrator::from_config(&config),
                Err(e) if e.is_config()
            ));
        }
    }
}
