//! Identity of the caller. Authentication happens upstream; we only read
//! the claim it forwards.

use axum::http::{HeaderMap, StatusCode};

use crate::domain::Identity;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn identity_from_headers(
    headers: &HeaderMap,
) -> std::result::Result<Identity, (StatusCode, String)> {
    let user_id = header_value(headers, USER_ID_HEADER).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            format!("missing {} header", USER_ID_HEADER),
        )
    })?;
    let display_name = header_value(headers, USER_NAME_HEADER).unwrap_or(user_id);
    Ok(Identity::new(user_id, display_name))
}
