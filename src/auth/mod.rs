use axum::http::HeaderMap;


/// Header carrying the authenticated user id.
///
/// End-user authentication happens upstream at the identity provider; the
/// gateway in front of this service verifies the session and forwards the
/// subject in this header.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Longest user id accepted from the gateway
const MAX_USER_ID_LEN: usize = 128;

/// Extract the authenticated user id, failing if there is none.
pub fn extract_user_id(headers: &HeaderMap) -> Result<String, IdentityError> {
    optional_user_id(headers)?.ok_or(IdentityError::Missing)
}

/// Extract the user id if the request carries one.
///
/// An absent header is `Ok(None)`; a present but malformed header is an error
/// so a broken gateway never silently downgrades a request to anonymous.
pub fn optional_user_id(headers: &HeaderMap) -> Result<Option<String>, IdentityError> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|_| IdentityError::InvalidFormat)?;
    parse_user_id(value).map(Some)
}

/// Validate a raw header value
fn parse_user_id(raw: &str) -> Result<String, IdentityError> {
    let user_id = raw.trim();

    if user_id.is_empty() {
        return Err(IdentityError::Empty);
    }

    if user_id.len() > MAX_USER_ID_LEN
        || user_id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(IdentityError::InvalidFormat);
    }

    Ok(user_id.to_string())
}

/// Identity extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum IdentityError {
    /// User id header not present
    Missing,
    /// Non-ASCII, too long, or contains whitespace
    InvalidFormat,
    /// Header present but blank
    Empty,
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::Missing => write!(f, "Authenticated user not provided"),
            IdentityError::InvalidFormat => write!(f, "Invalid user id format"),
            IdentityError::Empty => write!(f, "User id is empty"),
        }
    }
}

impl std::error::Error for IdentityError {}
