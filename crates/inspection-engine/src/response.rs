//! Engine response normalization
//!
//! Two response schemas are in the field:
//! - v1: `overall_result: "PASS" | "FAIL"`, `passed_devices`,
//!   `failed_devices`, `total_devices`, `roi_results[]`
//! - v2: `passed: bool`, `summary { passed_rois, failed_rois, total_rois }`,
//!   `roi_results[]` or `results[]`, optional `device_summaries`
//!
//! Both are folded into [`EngineVerdict`].

use crate::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Response schema the engine answered with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    V1,
    V2,
}

/// Canonical per-ROI result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoiVerdict {
    pub roi_id: u32,
    pub passed: bool,
    pub similarity: Option<f64>,
    pub decoded_value: Option<String>,
    pub error: Option<String>,
}

/// Counts reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineSummary {
    pub passed_rois: u32,
    pub failed_rois: u32,
    pub total_rois: u32,
    pub passed_devices: Option<u32>,
    pub failed_devices: Option<u32>,
    pub total_devices: Option<u32>,
}

/// Canonical engine answer for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineVerdict {
    pub schema: SchemaVersion,
    pub overall_passed: bool,
    pub roi_results: Vec<RoiVerdict>,
    pub summary: EngineSummary,
}

impl EngineVerdict {
    pub fn result_for(&self, roi_id: u32) -> Option<&RoiVerdict> {
        self.roi_results.iter().find(|r| r.roi_id == roi_id)
    }
}

#[derive(Debug, Deserialize)]
struct WireRoiResult {
    #[serde(alias = "idx", alias = "id")]
    roi_id: u32,
    passed: Option<bool>,
    result: Option<String>,
    #[serde(alias = "match_score")]
    similarity: Option<f64>,
    decoded_value: Option<String>,
    barcode: Option<String>,
    barcode_values: Option<Vec<String>>,
    ocr_text: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireSummary {
    passed_rois: Option<u32>,
    failed_rois: Option<u32>,
    total_rois: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    V2 {
        passed: bool,
        #[serde(default)]
        summary: Option<WireSummary>,
        #[serde(default, alias = "results")]
        roi_results: Vec<WireRoiResult>,
        #[serde(default)]
        device_summaries: Option<Value>,
    },
    V1 {
        overall_result: String,
        passed_devices: Option<u32>,
        failed_devices: Option<u32>,
        total_devices: Option<u32>,
        #[serde(default)]
        roi_results: Vec<WireRoiResult>,
    },
}

fn is_pass(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("pass")
}

impl From<WireRoiResult> for RoiVerdict {
    fn from(wire: WireRoiResult) -> Self {
        let mut error = wire.error.filter(|e| !e.is_empty());
        let passed = match (wire.passed, wire.result.as_deref()) {
            (Some(passed), _) => passed,
            (None, Some(result)) => is_pass(result),
            (None, None) => {
                error.get_or_insert_with(|| "engine returned no verdict".to_string());
                false
            }
        };
        let decoded_value = wire
            .decoded_value
            .or(wire.barcode)
            .or_else(|| wire.barcode_values.and_then(|v| v.into_iter().next()))
            .or(wire.ocr_text)
            .filter(|v| !v.is_empty());
        RoiVerdict {
            roi_id: wire.roi_id,
            passed,
            similarity: wire.similarity,
            decoded_value,
            error,
        }
    }
}

fn count(results: &[RoiVerdict]) -> (u32, u32) {
    let passed = results.iter().filter(|r| r.passed).count() as u32;
    (passed, results.len() as u32 - passed)
}

/// Parse an engine response body in either schema
pub fn parse_response(body: &str) -> Result<EngineVerdict, EngineError> {
    let wire: WireResponse = serde_json::from_str(body)
        .map_err(|e| EngineError::InvalidPayload(format!("unrecognized response schema: {}", e)))?;

    let verdict = match wire {
        WireResponse::V2 {
            passed,
            summary,
            roi_results,
            device_summaries,
        } => {
            let roi_results: Vec<RoiVerdict> = roi_results.into_iter().map(Into::into).collect();
            let (ok, failed) = count(&roi_results);
            let summary = summary.unwrap_or_default();
            let devices = device_counts(device_summaries.as_ref());
            EngineVerdict {
                schema: SchemaVersion::V2,
                overall_passed: passed,
                summary: EngineSummary {
                    passed_rois: summary.passed_rois.unwrap_or(ok),
                    failed_rois: summary.failed_rois.unwrap_or(failed),
                    total_rois: summary.total_rois.unwrap_or(ok + failed),
                    passed_devices: devices.map(|(p, _)| p),
                    failed_devices: devices.map(|(_, f)| f),
                    total_devices: devices.map(|(p, f)| p + f),
                },
                roi_results,
            }
        }
        WireResponse::V1 {
            overall_result,
            passed_devices,
            failed_devices,
            total_devices,
            roi_results,
        } => {
            let roi_results: Vec<RoiVerdict> = roi_results.into_iter().map(Into::into).collect();
            let (ok, failed) = count(&roi_results);
            EngineVerdict {
                schema: SchemaVersion::V1,
                overall_passed: is_pass(&overall_result),
                summary: EngineSummary {
                    passed_rois: ok,
                    failed_rois: failed,
                    total_rois: ok + failed,
                    passed_devices,
                    failed_devices,
                    total_devices,
                },
                roi_results,
            }
        }
    };

    let (ok, _) = count(&verdict.roi_results);
    if verdict.overall_passed && ok as usize != verdict.roi_results.len() {
        warn!(
            schema = ?verdict.schema,
            "Engine reported overall pass with failing ROIs"
        );
    }
    Ok(verdict)
}

/// `(passed, failed)` device counts from a `device_summaries` object or list
fn device_counts(summaries: Option<&Value>) -> Option<(u32, u32)> {
    let entries: Vec<&Value> = match summaries? {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => return None,
    };
    let passed = entries
        .iter()
        .filter(|e| e.get("passed").and_then(Value::as_bool).unwrap_or(false))
        .count() as u32;
    Some((passed, entries.len() as u32 - passed))
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"{
        "overall_result": "FAIL",
        "passed_devices": 1,
        "failed_devices": 1,
        "total_devices": 2,
        "roi_results": [
            {"roi_id": 1, "result": "PASS", "match_score": 0.97},
            {"roi_id": 2, "result": "FAIL", "match_score": 0.41},
            {"roi_id": 3, "result": "PASS", "barcode_values": ["SN-0042"]}
        ]
    }"#;

    const V2: &str = r#"{
        "passed": false,
        "summary": {"passed_rois": 2, "failed_rois": 1, "total_rois": 3},
        "results": [
            {"roi_id": 1, "passed": true, "similarity": 0.97},
            {"roi_id": 2, "passed": false, "similarity": 0.41},
            {"roi_id": 3, "passed": true, "decoded_value": "SN-0042"}
        ],
        "device_summaries": {"1": {"passed": true}, "2": {"passed": false}}
    }"#;

    #[test]
    fn test_both_schemas_normalize_identically() {
        let v1 = parse_response(V1).unwrap();
        let v2 = parse_response(V2).unwrap();

        assert_eq!(v1.schema, SchemaVersion::V1);
        assert_eq!(v2.schema, SchemaVersion::V2);
        assert_eq!(v1.overall_passed, v2.overall_passed);
        assert_eq!(v1.roi_results, v2.roi_results);
        assert_eq!(v1.summary, v2.summary);
        assert_eq!(
            v1.result_for(3).unwrap().decoded_value.as_deref(),
            Some("SN-0042")
        );
    }

    #[test]
    fn test_decoded_value_sources() {
        let body = r#"{"passed": true, "roi_results": [
            {"roi_id": 1, "passed": true, "barcode": "A"},
            {"roi_id": 2, "passed": true, "ocr_text": "LOT 7"},
            {"roi_id": 3, "passed": true, "barcode_values": []},
            {"roi_id": 4, "passed": true, "decoded_value": ""}
        ]}"#;
        let verdict = parse_response(body).unwrap();
        let decoded: Vec<_> = verdict
            .roi_results
            .iter()
            .map(|r| r.decoded_value.as_deref())
            .collect();
        assert_eq!(decoded, vec![Some("A"), Some("LOT 7"), None, None]);
    }

    #[test]
    fn test_missing_verdict_is_failure() {
        let body = r#"{"passed": false, "roi_results": [{"roi_id": 5}]}"#;
        let verdict = parse_response(body).unwrap();
        assert!(!verdict.roi_results[0].passed);
        assert!(verdict.roi_results[0].error.is_some());
    }

    #[test]
    fn test_unknown_schema_is_invalid() {
        assert!(matches!(
            parse_response(r#"{"status": "ok"}"#),
            Err(EngineError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_response("<html>"),
            Err(EngineError::InvalidPayload(_))
        ));
    }
}
