//! Remote Inspection Engine Clients
//!
//! The station owns no vision logic. Every captured group is posted to the
//! remote inspection engine, whose verdicts are normalized here from either
//! response schema it has shipped. Resolved device barcodes are translated by
//! the barcode-linking service.
//!
//! Remote failures are always returned as errors; nothing here fabricates a
//! verdict.

mod client;
mod linking;
mod request;
mod response;

pub use client::{EngineConfig, HttpInspectionEngine, InspectionEngine};
pub use linking::{BarcodeLinker, HttpBarcodeLinker, LinkError, LinkerConfig};
pub use request::{InspectionRequest, RequestMetadata};
pub use response::{parse_response, EngineSummary, EngineVerdict, RoiVerdict, SchemaVersion};

use thiserror::Error;

/// Inspection engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Inspection engine unavailable: {0}")]
    Unavailable(String),

    #[error("Inspection engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid inspection engine payload: {0}")]
    InvalidPayload(String),

    #[error("Inspection engine timed out after {0}ms")]
    Timeout(u64),

    #[error("Failed to encode inspection request: {0}")]
    Encode(String),
}

impl EngineError {
    /// Transport-level failure, as opposed to an answer the engine gave
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EngineError::Unavailable(_) | EngineError::Timeout(_))
    }
}
