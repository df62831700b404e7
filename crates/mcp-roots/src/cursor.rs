//! Version-bound pagination cursors
//!
//! A cursor is the URL-safe base64 (no padding) encoding of the compact
//! JSON object `{"v": <version>, "o": <offset>}`. Binding the offset to the
//! snapshot version lets a listing detect that the roots changed between
//! pages instead of silently skipping or repeating entries.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;

use crate::error::{RootsError, RootsResult};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CursorPayload {
    v: u64,
    o: i64,
}

/// Encode `(version, offset)` as an opaque token
pub fn encode(version: u64, offset: u64) -> String {
    let payload = serde_json::json!({ "v": version, "o": offset });
    URL_SAFE_NO_PAD.encode(payload.to_string())
}

/// Decode a token into `(version, offset)`
///
/// The offset is returned signed so callers can report a negative one as
/// [`RootsError::InvalidOffset`] after checking the version.
///
/// # Errors
///
/// Returns [`RootsError::InvalidCursor`] if the token is not base64, not
/// JSON, or not an object with exactly the integer fields `v` and `o`.
pub fn decode(token: &str) -> RootsResult<(u64, i64)> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| RootsError::InvalidCursor(format!("not base64url: {}", e)))?;
    let payload: CursorPayload = serde_json::from_slice(&bytes)
        .map_err(|e| RootsError::InvalidCursor(format!("unexpected payload: {}", e)))?;
    Ok((payload.v, payload.o))
}
