//! Per-attempt request materialization.
//!
//! A [`RequestSpec`] is built once per cell and shared read-only by every
//! worker. [`RequestSpec::build`] turns it into an [`Attempt`]: structured
//! bodies get a fresh correlation identifier under [`CORRELATION_KEY`],
//! binary bodies are the same bytes every time.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::Local;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{RequestType, ServiceConfig};
use crate::error::{EngineError, EngineResult};

/// Body key the correlation identifier is merged under.
pub const CORRELATION_KEY: &str = "bizno";

const ID_PREFIX: &str = "BIZ";
const ID_SUFFIX_LEN: usize = 6;
const ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Base payload of a request template.
#[derive(Debug, Clone)]
pub enum BasePayload {
    Structured(Map<String, Value>),
    Blob(Bytes),
}

/// Immutable request template for one cell.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub service_name: String,
    pub url: Url,
    pub payload: BasePayload,
    pub headers: HeaderMap,
}

/// Materialized body of one attempt.
#[derive(Debug, Clone)]
pub enum Payload {
    Structured(Value),
    Blob(Bytes),
}

/// One request instance, owned by a single worker.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub correlation_id: Option<String>,
    pub payload: Payload,
}

/// Outbound request description stored with every error record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMeta {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl RequestSpec {
    /// Build the template for a configured service, loading binary assets.
    pub fn from_service(service: &ServiceConfig) -> EngineResult<Self> {
        service.validate()?;

        match service.request_type {
            RequestType::Json => {
                let body = match &service.request_body {
                    Some(Value::Object(map)) => map.clone(),
                    _ => {
                        return Err(EngineError::config(format!(
                            "service '{}': request_body must be a mapping",
                            service.name
                        )))
                    }
                };
                Self::structured(&service.name, &service.url, body, service.headers.as_ref())
            }
            RequestType::Binary => {
                // validate() guarantees the path is present
                let path = service.binary_path.as_deref().ok_or_else(|| {
                    EngineError::config(format!("service '{}': missing binary_path", service.name))
                })?;
                let bytes = std::fs::read(path).map_err(|e| {
                    EngineError::config(format!(
                        "service '{}': cannot read {}: {}",
                        service.name,
                        path.display(),
                        e
                    ))
                })?;
                Self::blob(
                    &service.name,
                    &service.url,
                    Bytes::from(bytes),
                    service.headers.as_ref(),
                )
            }
        }
    }

    /// Template for a JSON body service.
    pub fn structured(
        service_name: &str,
        url: &str,
        body: Map<String, Value>,
        headers: Option<&BTreeMap<String, String>>,
    ) -> EngineResult<Self> {
        Ok(Self {
            service_name: service_name.to_string(),
            url: parse_url(service_name, url)?,
            payload: BasePayload::Structured(body),
            headers: build_headers(service_name, headers, "application/json")?,
        })
    }

    /// Template for a binary body service.
    pub fn blob(
        service_name: &str,
        url: &str,
        bytes: Bytes,
        headers: Option<&BTreeMap<String, String>>,
    ) -> EngineResult<Self> {
        Ok(Self {
            service_name: service_name.to_string(),
            url: parse_url(service_name, url)?,
            payload: BasePayload::Blob(bytes),
            headers: build_headers(service_name, headers, "application/octet-stream")?,
        })
    }

    pub fn request_type(&self) -> RequestType {
        match self.payload {
            BasePayload::Structured(_) => RequestType::Json,
            BasePayload::Blob(_) => RequestType::Binary,
        }
    }

    /// Materialize one attempt. The base payload is never mutated.
    pub fn build(&self) -> Attempt {
        match &self.payload {
            BasePayload::Structured(base) => {
                let id = generate_correlation_id();
                let mut body = base.clone();
                body.insert(CORRELATION_KEY.to_string(), Value::String(id.clone()));
                Attempt {
                    correlation_id: Some(id),
                    payload: Payload::Structured(Value::Object(body)),
                }
            }
            BasePayload::Blob(bytes) => Attempt {
                correlation_id: None,
                payload: Payload::Blob(bytes.clone()),
            },
        }
    }

    /// Describe the outbound request of `attempt` for diagnostics.
    pub fn meta(&self, attempt: &Attempt) -> RequestMeta {
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| {
                let value = value.to_str().unwrap_or("<non-ascii>").to_string();
                (name.as_str().to_string(), value)
            })
            .collect();

        let (body, kind) = match &attempt.payload {
            Payload::Structured(value) => (Some(value.clone()), None),
            Payload::Blob(_) => (None, Some(RequestType::Binary.as_str())),
        };

        RequestMeta {
            url: self.url.to_string(),
            headers,
            body,
            kind,
        }
    }
}

/// `BIZ` + local time to the second + 6 uppercase alphanumerics.
pub fn generate_correlation_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect();
    format!("{}{}{}", ID_PREFIX, Local::now().format("%Y%m%d%H%M%S"), suffix)
}

fn parse_url(service_name: &str, url: &str) -> EngineResult<Url> {
    let parsed = Url::parse(url.trim()).map_err(|e| {
        EngineError::config(format!("service '{}': invalid url '{}': {}", service_name, url, e))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(EngineError::config(format!(
            "service '{}': unsupported scheme '{}'",
            service_name, other
        ))),
    }
}

fn build_headers(
    service_name: &str,
    headers: Option<&BTreeMap<String, String>>,
    default_content_type: &'static str,
) -> EngineResult<HeaderMap> {
    let mut map = HeaderMap::new();

    let Some(headers) = headers else {
        map.insert(CONTENT_TYPE, HeaderValue::from_static(default_content_type));
        return Ok(map);
    };

    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            EngineError::config(format!(
                "service '{}': invalid header name '{}': {}",
                service_name, name, e
            ))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            EngineError::config(format!(
                "service '{}': invalid value for header '{}': {}",
                service_name, name, e
            ))
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}
