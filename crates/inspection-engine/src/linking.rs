//! Barcode-linking client
//!
//! Translates a raw device barcode into the standardized identifier used by
//! the factory systems. Barcodes are forwarded exactly as resolved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Barcode-linking errors. Never fatal to an inspection.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Barcode linking service unavailable: {0}")]
    Unavailable(String),

    #[error("Barcode linking service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Barcode linking service returned no identifier")]
    NoIdentifier,

    #[error("Barcode linking service returned unexpected content: {0}")]
    UnexpectedContent(String),

    #[error("Barcode linking timed out after {0}ms")]
    Timeout(u64),
}

/// Linking service endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000/api/link".to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Raw barcode to standardized identifier
#[async_trait]
pub trait BarcodeLinker: Send + Sync {
    async fn link(&self, raw: &str) -> Result<String, LinkError>;
}

/// Linking service reached over HTTP
pub struct HttpBarcodeLinker {
    client: reqwest::Client,
    config: LinkerConfig,
}

impl HttpBarcodeLinker {
    pub fn new(config: LinkerConfig) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LinkError::Unavailable(e.to_string()))?;
        Ok(Self { client, config })
    }
}

/// Identifier from a linking response: a bare string, a JSON string, or an
/// object carrying `device_barcode`, `linked_barcode` or `barcode`.
///
/// Only JSON and plain-text responses are accepted. A bare-text identifier
/// is a single line that does not look like markup.
fn parse_link_response(content_type: Option<&str>, body: &str) -> Result<String, LinkError> {
    if let Some(content_type) = content_type {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime != "application/json" && mime != "text/plain" && !mime.ends_with("+json") {
            return Err(LinkError::UnexpectedContent(mime));
        }
    }

    let identifier = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => s,
        Ok(Value::Number(n)) => n.to_string(),
        Ok(Value::Object(map)) => ["device_barcode", "linked_barcode", "barcode"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or(LinkError::NoIdentifier)?,
        Ok(_) => return Err(LinkError::NoIdentifier),
        Err(_) => {
            let text = body.trim();
            if text.starts_with('<') || text.lines().count() > 1 {
                return Err(LinkError::UnexpectedContent("non-identifier text body".to_string()));
            }
            text.to_string()
        }
    };
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(LinkError::NoIdentifier);
    }
    Ok(identifier.to_string())
}

#[async_trait]
impl BarcodeLinker for HttpBarcodeLinker {
    async fn link(&self, raw: &str) -> Result<String, LinkError> {
        let response = self
            .client
            .post(&self.config.url)
            .json(&json!({ "barcode": raw }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LinkError::Timeout(self.config.timeout_ms)
                } else {
                    LinkError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| LinkError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(LinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let linked = parse_link_response(content_type.as_deref(), &body)?;
        debug!(raw, linked = %linked, "Barcode linked");
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Option<String> {
        parse_link_response(None, body).ok()
    }

    #[test]
    fn test_link_response_shapes() {
        assert_eq!(parse("DEV-001").as_deref(), Some("DEV-001"));
        assert_eq!(parse("\"DEV-002\"").as_deref(), Some("DEV-002"));
        assert_eq!(parse("4006381333931").as_deref(), Some("4006381333931"));
        assert_eq!(parse(r#"{"linked_barcode": "DEV-003"}"#).as_deref(), Some("DEV-003"));
        assert_eq!(
            parse(r#"{"device_barcode": "DEV-004", "barcode": "RAW"}"#).as_deref(),
            Some("DEV-004")
        );
    }

    #[test]
    fn test_empty_link_response() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("  "), None);
        assert_eq!(parse(r#"{"status": "unknown"}"#), None);
        assert_eq!(parse("null"), None);
    }

    #[test]
    fn test_content_types() {
        let json = Some("application/json; charset=utf-8");
        assert_eq!(parse_link_response(json, r#""DEV-005""#).unwrap(), "DEV-005");
        assert_eq!(parse_link_response(Some("text/plain"), "DEV-006\n").unwrap(), "DEV-006");
        assert!(matches!(
            parse_link_response(Some("text/html"), "DEV-007"),
            Err(LinkError::UnexpectedContent(mime)) if mime == "text/html"
        ));
    }

    #[test]
    fn test_error_page_is_not_an_identifier() {
        let page = "<!DOCTYPE html>\n<html><body>502 Bad Gateway</body></html>";
        assert!(matches!(
            parse_link_response(None, page),
            Err(LinkError::UnexpectedContent(_))
        ));
        assert!(matches!(
            parse_link_response(Some("text/plain"), "<html>maintenance</html>"),
            Err(LinkError::UnexpectedContent(_))
        ));
        assert!(matches!(
            parse_link_response(Some("text/plain"), "Service\nUnavailable"),
            Err(LinkError::UnexpectedContent(_))
        ));
    }
}
