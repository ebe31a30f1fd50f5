//! Boundary validators for caller-supplied input.
//!
//! These run at the outer surface (RPC glue, peer handshake) before a
//! payload is built, and enforce stricter bounds than the protocol
//! itself — e.g. task descriptions are capped at 16 KiB here while the
//! internal `task.assign` payload allows 64 KiB.
//!
//! | Validator | Rule |
//! |-----------|------|
//! | [`validate_agent_config_id`] | `^[a-z0-9][a-z0-9_-]{0,127}$` |
//! | [`validate_role_id`] | `^[a-z][a-z0-9_-]{0,63}$` |
//! | [`validate_uuid`] | parseable, version 4 |
//! | [`validate_payload_size`] | JSON-serialized ≤ 256 KiB |
//! | [`validate_task_description`] | ≤ 16 384 chars |
//! | [`validate_gateway_url`] | scheme ws/wss/http/https, no credentials |
//! | [`sanitize_text`] | strips C0 (keeps `\t` `\n` `\r`), C1, zero-width |

use crate::payload::MessagePayload;
use lattice_types::ErrorCode;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Maximum JSON-serialized payload size accepted at the boundary.
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Maximum task description length accepted at the boundary.
pub const MAX_DESCRIPTION_LEN: usize = 16_384;

const MAX_AGENT_ID_LEN: usize = 128;
const MAX_ROLE_ID_LEN: usize = 64;

/// A boundary validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid agent config id: {0:?}")]
    InvalidAgentId(String),

    #[error("invalid role id: {0:?}")]
    InvalidRoleId(String),

    #[error("invalid UUID: {0:?}")]
    InvalidUuid(String),

    #[error("payload is {size} bytes serialized, limit is {MAX_PAYLOAD_BYTES}")]
    PayloadTooLarge { size: usize },

    #[error("task description is {len} chars, limit is {MAX_DESCRIPTION_LEN}")]
    DescriptionTooLong { len: usize },

    #[error("gateway URL did not parse: {0}")]
    UnparsableUrl(String),

    #[error("gateway URL scheme {0:?} is not one of ws/wss/http/https")]
    UnsupportedScheme(String),

    #[error("gateway URL must not embed credentials")]
    EmbeddedCredentials,
}

impl ErrorCode for ValidationError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidAgentId(_) => "PROTO_INVALID_AGENT_ID",
            Self::InvalidRoleId(_) => "PROTO_INVALID_ROLE_ID",
            Self::InvalidUuid(_) => "PROTO_INVALID_UUID",
            Self::PayloadTooLarge { .. } => "PROTO_PAYLOAD_TOO_LARGE",
            Self::DescriptionTooLong { .. } => "PROTO_DESCRIPTION_TOO_LONG",
            Self::UnparsableUrl(_) => "PROTO_UNPARSABLE_URL",
            Self::UnsupportedScheme(_) => "PROTO_UNSUPPORTED_SCHEME",
            Self::EmbeddedCredentials => "PROTO_EMBEDDED_CREDENTIALS",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Validates an agent config id against `^[a-z0-9][a-z0-9_-]{0,127}$`.
///
/// # Errors
///
/// [`ValidationError::InvalidAgentId`] for empty, oversized or
/// out-of-alphabet input.
pub fn validate_agent_config_id(id: &str) -> Result<(), ValidationError> {
    let bytes = id.as_bytes();
    let head_ok = matches!(bytes.first(), Some(b'a'..=b'z' | b'0'..=b'9'));
    let tail_ok = bytes
        .iter()
        .skip(1)
        .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'));

    if bytes.len() > MAX_AGENT_ID_LEN || !head_ok || !tail_ok {
        return Err(ValidationError::InvalidAgentId(id.to_string()));
    }
    Ok(())
}

/// Validates a role id against `^[a-z][a-z0-9_-]{0,63}$`.
///
/// # Errors
///
/// [`ValidationError::InvalidRoleId`] for empty, oversized or
/// out-of-alphabet input.
pub fn validate_role_id(id: &str) -> Result<(), ValidationError> {
    let bytes = id.as_bytes();
    let head_ok = matches!(bytes.first(), Some(b'a'..=b'z'));
    let tail_ok = bytes
        .iter()
        .skip(1)
        .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'));

    if bytes.len() > MAX_ROLE_ID_LEN || !head_ok || !tail_ok {
        return Err(ValidationError::InvalidRoleId(id.to_string()));
    }
    Ok(())
}

/// Validates that `s` parses as a version-4 UUID.
///
/// # Errors
///
/// [`ValidationError::InvalidUuid`] on parse failure or wrong version.
pub fn validate_uuid(s: &str) -> Result<Uuid, ValidationError> {
    let parsed = Uuid::parse_str(s).map_err(|_| ValidationError::InvalidUuid(s.to_string()))?;
    if parsed.get_version_num() != 4 {
        return Err(ValidationError::InvalidUuid(s.to_string()));
    }
    Ok(parsed)
}

/// Validates the JSON-serialized size of a payload.
///
/// # Errors
///
/// [`ValidationError::PayloadTooLarge`] above [`MAX_PAYLOAD_BYTES`].
pub fn validate_payload_size(payload: &MessagePayload) -> Result<(), ValidationError> {
    // Sum-type serialization cannot fail; an empty vec falls through to Ok.
    let size = serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(0);
    if size > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::PayloadTooLarge { size });
    }
    Ok(())
}

/// Validates a caller-supplied task description.
///
/// # Errors
///
/// [`ValidationError::DescriptionTooLong`] above [`MAX_DESCRIPTION_LEN`].
pub fn validate_task_description(description: &str) -> Result<(), ValidationError> {
    let len = description.chars().count();
    if len > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::DescriptionTooLong { len });
    }
    Ok(())
}

/// Validates a peer gateway URL.
///
/// Accepted schemes are `ws`, `wss`, `http` and `https`; URLs carrying a
/// username or password are rejected outright.
///
/// # Errors
///
/// [`ValidationError::UnparsableUrl`], [`ValidationError::UnsupportedScheme`]
/// or [`ValidationError::EmbeddedCredentials`].
pub fn validate_gateway_url(raw: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(raw).map_err(|e| ValidationError::UnparsableUrl(e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" | "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ValidationError::EmbeddedCredentials);
    }
    Ok(url)
}

/// Strips control and zero-width code points from caller-supplied text.
///
/// Removes C0 controls except `\t`, `\n`, `\r`; C1 controls
/// (U+0080–U+009F); and the zero-width points U+200B–U+200D, U+2060 and
/// U+FEFF. Everything else passes through unchanged.
#[must_use]
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|&c| {
            let c0 = c < '\u{20}' && c != '\t' && c != '\n' && c != '\r';
            let c1 = ('\u{80}'..='\u{9F}').contains(&c);
            let zero_width =
                ('\u{200B}'..='\u{200D}').contains(&c) || c == '\u{2060}' || c == '\u{FEFF}';
            !(c0 || c1 || zero_width)
        })
        .collect()
}
