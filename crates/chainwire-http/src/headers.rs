//! Request header construction.
//!
//! Headers are layered: transport defaults, then configured headers, then
//! per-call overrides. Names compare case-insensitively; the last write wins.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};

use chainwire_core::RpcError;

/// `chainwire/<version> (<component>)`.
pub fn construct_user_agent(component: &str) -> String {
    format!("chainwire/{} ({component})", env!("CARGO_PKG_VERSION"))
}

/// `Content-Type: application/json` plus the given user agent.
pub fn default_headers(user_agent: &str) -> Result<HeaderMap, RpcError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, header_value(user_agent)?);
    Ok(headers)
}

/// Apply `overrides` on top of `base`, key by key.
pub fn merge_headers(base: &HeaderMap, overrides: &[(String, String)]) -> Result<HeaderMap, RpcError> {
    let mut merged = base.clone();
    for (name, value) in overrides {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RpcError::Encoding(format!("invalid header name '{name}': {e}")))?;
        merged.insert(name, header_value(value)?);
    }
    Ok(merged)
}

fn header_value(value: &str) -> Result<HeaderValue, RpcError> {
    HeaderValue::from_str(value)
        .map_err(|e| RpcError::Encoding(format!("invalid header value '{value}': {e}")))
}
