//! # Cursor Utilities
//!
//! Opaque keyset cursors for listing execution logs newest first. A cursor
//! names the last row of the previous page by `(started_at, id)`.

use crate::error::ApiError;
use axum::http::StatusCode;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_CURSOR_LEN: usize = 512;
const MAX_DECODED_LEN: usize = 256;

/// Position of the last row returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    pub started_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Encode cursor data as an opaque URL-safe base64 string
pub fn encode_cursor(started_at: &DateTime<Utc>, id: &Uuid) -> String {
    let cursor_data = CursorData {
        started_at: *started_at,
        id: *id,
    };
    let json = serde_json::to_vec(&cursor_data).unwrap_or_default();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
}

fn invalid(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
}

/// Decode cursor data from an opaque string produced by [`encode_cursor`]
pub fn decode_cursor(cursor: &str) -> Result<CursorData, ApiError> {
    if cursor.is_empty() {
        return Err(invalid("cursor cannot be empty"));
    }
    if cursor.len() > MAX_CURSOR_LEN {
        return Err(invalid("cursor is too long"));
    }
    if !cursor
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("cursor contains invalid characters"));
    }

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid("cursor is not valid base64"))?;

    if decoded.len() > MAX_DECODED_LEN {
        return Err(invalid("decoded cursor is too large"));
    }

    let cursor_data: CursorData = serde_json::from_slice(&decoded)
        .map_err(|_| invalid("cursor contains invalid JSON structure"))?;

    if cursor_data.id.is_nil() {
        return Err(invalid("cursor contains invalid ID"));
    }

    Ok(cursor_data)
}
