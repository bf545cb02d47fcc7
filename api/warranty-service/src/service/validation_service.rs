use crate::module::warranty::error::AppError;
use crate::module::warranty::model::PolicyRules;

/// `0x` followed by 40 hex digits; returned lowercased.
pub fn normalize_wallet_address(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    let valid = trimmed.len() == 42
        && trimmed.starts_with("0x")
        && trimmed[2..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(AppError::bad_request(
            "INVALID_WALLET_ADDRESS",
            "wallet address must be 0x followed by 40 hex characters",
        ));
    }
    Ok(trimmed.to_lowercase())
}

pub fn validate_metadata_uri(raw: &str) -> Result<(), AppError> {
    if raw.trim().is_empty() {
        return Err(AppError::bad_request("INVALID_METADATA_URI", "metadata_uri is required"));
    }
    Ok(())
}

pub fn validate_webhook_url(raw: Option<&str>) -> Result<(), AppError> {
    let Some(url) = raw else {
        return Ok(());
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AppError::bad_request(
            "INVALID_WEBHOOK_URL",
            "webhook_url must be an http(s) url",
        ));
    }
    Ok(())
}

pub fn validate_policy_rules(rules: &PolicyRules) -> Result<(), AppError> {
    let numbers = [
        ("max_value_per_action", rules.max_value_per_action),
        ("window_seconds", rules.window_seconds),
        ("required_data_freshness_seconds", rules.required_data_freshness_seconds),
    ];
    for (field, value) in numbers {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(AppError::bad_request(
                    "INVALID_POLICY_RULES",
                    format!("{field} must be a finite non-negative number"),
                ));
            }
        }
    }
    if matches!(rules.window_seconds, Some(w) if w == 0.0) {
        return Err(AppError::bad_request(
            "INVALID_POLICY_RULES",
            "window_seconds must be greater than zero",
        ));
    }

    let names = [
        ("allowed_tools", &rules.allowed_tools),
        ("prohibited_targets", &rules.prohibited_targets),
    ];
    for (field, list) in names {
        if list.iter().flatten().any(|name| name.trim().is_empty()) {
            return Err(AppError::bad_request(
                "INVALID_POLICY_RULES",
                format!("{field} entries must be non-empty"),
            ));
        }
    }
    Ok(())
}
