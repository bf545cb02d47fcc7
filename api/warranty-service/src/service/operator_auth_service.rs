use crate::module::warranty::error::AppError;
use crate::module::warranty::model::OperatorRecord;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";
const KEY_COMPARE_DOMAIN: &[u8] = b"warranty:operator-api-key";

/// 48 hex characters drawn from two v4 uuids.
pub fn generate_api_key() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    hex::encode(&bytes[..24])
}

pub fn read_api_key(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized("MISSING_API_KEY", "X-API-Key header is required"))
}

/// Checks the presented key against the owning operator. A key that belongs
/// to some other registered operator is a 403, an unknown key a 401.
pub fn authorize_operator<'a>(
    presented: &str,
    owner: &OperatorRecord,
    mut operators: impl Iterator<Item = &'a OperatorRecord>,
) -> Result<(), AppError> {
    if keys_match(presented, &owner.api_key) {
        return Ok(());
    }
    if operators.any(|op| keys_match(presented, &op.api_key)) {
        return Err(AppError::forbidden(
            "AGENT_NOT_OWNED",
            "api key belongs to a different operator",
        ));
    }
    Err(AppError::unauthorized("INVALID_API_KEY", "invalid api key"))
}

/// Constant-time comparison: both keys are MACed under a fixed domain key
/// and the tags compared with `verify_slice`.
fn keys_match(presented: &str, expected: &str) -> bool {
    let Ok(mut expected_mac) = Hmac::<Sha256>::new_from_slice(KEY_COMPARE_DOMAIN) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut presented_mac) = Hmac::<Sha256>::new_from_slice(KEY_COMPARE_DOMAIN) else {
        return false;
    };
    presented_mac.update(presented.as_bytes());
    presented_mac.verify_slice(&expected_tag).is_ok()
}
