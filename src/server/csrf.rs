//! CSRF tokens
//!
//! A token is 32 bytes from the thread-local CSPRNG, hex encoded. Tokens are
//! issued with every form render and only checked for presence on submit.

use axum::http::HeaderMap;
use rand::RngCore;

/// Header carrying the token (`X-CSRF-Token`)
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Form field carrying the token
pub const CSRF_FIELD: &str = "csrf_token";

const TOKEN_BYTES: usize = 32;

/// Generate a fresh token (64 lowercase hex characters)
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Token presented by the client, header first, then form field
///
/// Both sources are trimmed; blank values count as absent.
pub fn presented_token(headers: &HeaderMap, form_value: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    from_header
        .or_else(|| form_value.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
}
