// ABOUTME: Access-token check for incoming gateway connections
// ABOUTME: Token comes from an Authorization header or the access_token query parameter

use axum::http::{header, HeaderMap, StatusCode};
use std::collections::HashMap;

/// `Ok` when no token is configured or the presented one matches.
/// Missing token is 401, a wrong one 403.
pub fn check_access(
    expected: Option<&str>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<(), StatusCode> {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return Ok(());
    };

    let presented = match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        // "Bearer <token>" or "Token <token>"; the scheme is not checked
        Some(value) => value
            .split_once(' ')
            .map(|(_, token)| token.trim())
            .unwrap_or(value),
        None => query.get("access_token").map(String::as_str).unwrap_or(""),
    };

    if presented.is_empty() {
        Err(StatusCode::UNAUTHORIZED)
    } else if presented == expected {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}
