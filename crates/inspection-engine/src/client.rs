//! HTTP client for the remote inspection engine

use crate::request::InspectionRequest;
use crate::response::{parse_response, EngineVerdict};
use crate::EngineError;
use async_trait::async_trait;
use metrics::counter;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Inspection engine endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine base URL
    pub base_url: String,
    /// Path of the multipart inspection endpoint
    pub inspect_path: String,
    /// HTTP request timeout (ms)
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            inspect_path: "/api/inspect".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn inspect_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.inspect_path.trim_start_matches('/')
        )
    }
}

/// Evaluates one capture group remotely
#[async_trait]
pub trait InspectionEngine: Send + Sync {
    async fn inspect(&self, request: &InspectionRequest) -> Result<EngineVerdict, EngineError>;
}

/// Inspection engine reached over HTTP `multipart/form-data`
pub struct HttpInspectionEngine {
    client: reqwest::Client,
    config: EngineConfig,
}

impl HttpInspectionEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EngineError::Unavailable(format!("HTTP client setup failed: {}", e)))?;
        info!(url = %config.inspect_url(), "Inspection engine client ready");
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn build_form(&self, request: &InspectionRequest) -> Result<Form, EngineError> {
        let metadata = serde_json::to_string(&request.metadata())
            .map_err(|e| EngineError::Encode(e.to_string()))?;

        let image = request.image.clone();
        let png = tokio::task::spawn_blocking(move || image.encode_png())
            .await
            .map_err(|e| EngineError::Encode(e.to_string()))?
            .map_err(|e| EngineError::Encode(e.to_string()))?;

        let metadata = Part::text(metadata)
            .mime_str("application/json")
            .map_err(|e| EngineError::Encode(e.to_string()))?;
        let image = Part::bytes(png)
            .file_name(format!("{}.png", request.image.id()))
            .mime_str("image/png")
            .map_err(|e| EngineError::Encode(e.to_string()))?;

        Ok(Form::new().part("metadata", metadata).part("image", image))
    }

    /// Map a send or body-read failure, counting it as an engine failure
    fn transport_error(&self, e: reqwest::Error) -> EngineError {
        counter!("aoi_engine_failures_total").increment(1);
        if e.is_timeout() {
            EngineError::Timeout(self.config.timeout_ms)
        } else {
            EngineError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl InspectionEngine for HttpInspectionEngine {
    async fn inspect(&self, request: &InspectionRequest) -> Result<EngineVerdict, EngineError> {
        let form = self.build_form(request).await?;
        counter!("aoi_engine_requests_total").increment(1);
        debug!(
            cycle_id = %request.cycle_id,
            image_id = %request.image.id(),
            rois = request.rois.len(),
            "Posting group to inspection engine"
        );

        let response = self
            .client
            .post(self.config.inspect_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let mut body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            counter!("aoi_engine_failures_total").increment(1);
            warn!(status = status.as_u16(), "Inspection engine rejected request");
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_response(&body)
    }
}
