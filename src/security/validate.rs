//! Input validation for scanned codes and free-text fields.
//!
//! Asset tags and badge credentials ride in URLs, remote API queries, and
//! the audit trail, so they are held to a strict allowlist. Notes are looser
//! but still bounded and control-character free.

use crate::error::{EngineError, EngineResult};

/// Minimum plausible code length. Anything shorter is scanner noise.
pub const MIN_CODE_LEN: usize = 3;

/// Validate a decoded or hand-entered code (asset tag, badge number).
///
/// Allowlist is alphanumeric plus `-` and `_`; whitespace is trimmed off the
/// ends first. Returns the normalized code.
pub fn validate_code(raw: &str, max_len: usize) -> EngineResult<String> {
    let code = raw.trim();

    if code.is_empty() {
        return Err(EngineError::Validation("code is empty".into()));
    }
    if code.len() < MIN_CODE_LEN {
        return Err(EngineError::Validation(format!(
            "code too short (minimum {} characters)",
            MIN_CODE_LEN
        )));
    }
    if code.len() > max_len {
        return Err(EngineError::Validation(format!(
            "code too long (maximum {} characters)",
            max_len
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::Validation(
            "code contains characters outside [A-Za-z0-9_-]".into(),
        ));
    }

    Ok(code.to_string())
}

/// Validate an optional free-text note attached to an operation.
///
/// Notes are forwarded to the remote system verbatim, so control characters
/// are rejected rather than stripped.
pub fn validate_note(raw: &str, max_len: usize) -> EngineResult<String> {
    let note = raw.trim();

    if note.len() > max_len {
        return Err(EngineError::Validation(format!(
            "note too long (maximum {} characters)",
            max_len
        )));
    }
    if note.chars().any(|c| c.is_control()) {
        return Err(EngineError::Validation(
            "note contains control characters".into(),
        ));
    }

    Ok(note.to_string())
}
