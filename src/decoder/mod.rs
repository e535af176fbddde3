//! Scan decoding subsystem.
//!
//! Turns a raw scan payload (camera frame or hardware-scanner keystrokes)
//! into a trustworthy code. Image decoding runs a fixed, ordered,
//! short-circuiting pipeline of preprocessing transforms under a wall-clock
//! budget; every result carries the index of the stage that produced it.
//!
//! # Data Flow
//! ```text
//! ScanInput::Text ──────────────► validation ─► DecodedCode (stage 0)
//! ScanInput::Image ─► size/magic gate ─► stage 0 direct decode
//!                                        ─► stage 1..n transforms, decode
//!                                           after each, stop at first hit
//! ```

pub mod pipeline;
pub mod stages;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use pipeline::DecodePipeline;

/// Barcode encoding standards the kiosk accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    Code128,
    Code39,
    Qr,
    /// Pre-decoded payloads (hardware scanner keystrokes) or formats the
    /// reader recognized outside the configured set.
    Other,
}

/// A successfully resolved scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedCode {
    pub value: String,
    pub symbology: Symbology,
    /// Index of the preprocessing stage that produced the hit; 0 is the
    /// untransformed frame. Diagnostic provenance only.
    pub source_stage: usize,
}

/// Why a scan could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    /// Rejected before any pixel work: oversize, truncated, wrong container
    /// format, or a decoded value that failed validation.
    #[error("invalid scan input: {0}")]
    InvalidInput(String),

    /// The pipeline ran out of its wall-clock budget.
    #[error("decode exceeded time budget of {0:?}")]
    Timeout(Duration),

    /// Every stage ran and none produced a supported code.
    #[error("no supported code found in scan")]
    NoMatch,
}

/// Raw scan payload. Ephemeral; dropped at the end of the request.
#[derive(Debug, Clone)]
pub enum ScanInput {
    Image(Vec<u8>),
    Text(String),
}
