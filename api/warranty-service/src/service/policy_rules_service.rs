use crate::module::warranty::model::{
    PolicyRules, ReasonCode, RunHistoryEntry, RunMetadata, TranscriptEntry, TranscriptRole,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Outcome of one rule check. `evidence` is an empty object when the check
/// passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub code: ReasonCode,
    pub passed: bool,
    pub evidence: Value,
}

impl RuleResult {
    fn pass(code: ReasonCode) -> Self {
        Self {
            code,
            passed: true,
            evidence: Value::Object(Map::new()),
        }
    }

    fn fail(code: ReasonCode, evidence: Value) -> Self {
        Self {
            code,
            passed: false,
            evidence,
        }
    }
}

pub fn check_tool_whitelist(transcript: &[TranscriptEntry], rules: &PolicyRules) -> RuleResult {
    let allowed = rules
        .allowed_tools
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<BTreeSet<_>>();
    if allowed.is_empty() {
        return RuleResult::pass(ReasonCode::ToolWhitelistViolation);
    }

    let disallowed = tool_calls(transcript)
        .filter_map(|entry| entry.tool.as_deref())
        .filter(|tool| !tool.is_empty() && !allowed.contains(tool))
        .collect::<Vec<_>>();

    if disallowed.is_empty() {
        return RuleResult::pass(ReasonCode::ToolWhitelistViolation);
    }
    RuleResult::fail(
        ReasonCode::ToolWhitelistViolation,
        json!({ "disallowed_tools": disallowed, "allowed": allowed }),
    )
}

/// Only the `value` key is read, falling back to `amount` when `value` is
/// absent. Values that are not numbers or numeric strings are skipped.
pub fn check_value_limits(transcript: &[TranscriptEntry], rules: &PolicyRules) -> RuleResult {
    let Some(max) = rules.max_value_per_action else {
        return RuleResult::pass(ReasonCode::ValueLimitExceeded);
    };

    let mut violations = Vec::new();
    for entry in tool_calls(transcript) {
        let raw = entry.args.get("value").or_else(|| entry.args.get("amount"));
        let Some(value) = raw.and_then(numeric_value) else {
            continue;
        };
        if value > max {
            violations.push(json!({ "tool": entry.tool, "value": value, "max": max }));
        }
    }

    if violations.is_empty() {
        return RuleResult::pass(ReasonCode::ValueLimitExceeded);
    }
    RuleResult::fail(ReasonCode::ValueLimitExceeded, json!({ "violations": violations }))
}

/// The first present key of `target`, `to`, `address` names the target;
/// matching is case-insensitive.
pub fn check_prohibited_targets(transcript: &[TranscriptEntry], rules: &PolicyRules) -> RuleResult {
    let prohibited = rules
        .prohibited_targets
        .iter()
        .flatten()
        .map(|target| target.to_lowercase())
        .collect::<BTreeSet<_>>();
    if prohibited.is_empty() {
        return RuleResult::pass(ReasonCode::ProhibitedTarget);
    }

    let mut violations = Vec::new();
    for entry in tool_calls(transcript) {
        let target = ["target", "to", "address"]
            .iter()
            .find_map(|key| entry.args.get(*key));
        if let Some(Value::String(target)) = target {
            if prohibited.contains(&target.to_lowercase()) {
                violations.push(json!({ "tool": entry.tool, "target": target }));
            }
        }
    }

    if violations.is_empty() {
        return RuleResult::pass(ReasonCode::ProhibitedTarget);
    }
    RuleResult::fail(
        ReasonCode::ProhibitedTarget,
        json!({ "violations": violations, "prohibited": prohibited }),
    )
}

pub fn check_action_frequency(history: &[RunHistoryEntry], rules: &PolicyRules, now: f64) -> RuleResult {
    let (Some(max), Some(window)) = (rules.max_actions_per_window, rules.window_seconds) else {
        return RuleResult::pass(ReasonCode::FrequencyExceeded);
    };

    let cutoff = now - window;
    let count = history.iter().filter(|run| run.timestamp >= cutoff).count() as u64;
    if count > max {
        return RuleResult::fail(
            ReasonCode::FrequencyExceeded,
            json!({ "count": count, "max": max, "window_seconds": window }),
        );
    }
    RuleResult::pass(ReasonCode::FrequencyExceeded)
}

pub fn check_data_freshness(metadata: &RunMetadata, rules: &PolicyRules, now: f64) -> RuleResult {
    let Some(max_age) = rules.required_data_freshness_seconds else {
        return RuleResult::pass(ReasonCode::StaleData);
    };

    let stale = metadata
        .data_sources
        .iter()
        .filter_map(|source| {
            let age = now - source.timestamp;
            (age > max_age).then(|| {
                json!({
                    "source": source.name.as_deref().unwrap_or("unknown"),
                    "age_seconds": age,
                    "max_seconds": max_age,
                })
            })
        })
        .collect::<Vec<_>>();

    if stale.is_empty() {
        return RuleResult::pass(ReasonCode::StaleData);
    }
    RuleResult::fail(ReasonCode::StaleData, json!({ "stale_sources": stale }))
}

pub fn check_model_mismatch(metadata: &RunMetadata) -> RuleResult {
    let declared = metadata.declared_model.as_deref().filter(|m| !m.is_empty());
    let executed = metadata.executed_model.as_deref().filter(|m| !m.is_empty());
    match (declared, executed) {
        (Some(declared), Some(executed)) if declared != executed => RuleResult::fail(
            ReasonCode::ModelMismatch,
            json!({ "declared": declared, "executed": executed }),
        ),
        _ => RuleResult::pass(ReasonCode::ModelMismatch),
    }
}

fn tool_calls(transcript: &[TranscriptEntry]) -> impl Iterator<Item = &TranscriptEntry> {
    transcript
        .iter()
        .filter(|entry| entry.role == TranscriptRole::ToolCall)
}

fn numeric_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::warranty::model::DataSource;

    fn call(tool: &str, args: Value) -> TranscriptEntry {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        TranscriptEntry::tool_call(tool, args, None)
    }

    fn rules(value: Value) -> PolicyRules {
        serde_json::from_value(value).expect("rules")
    }

    #[test]
    fn whitelist_passes_when_unset_or_empty() {
        let transcript = vec![call("anything", json!({}))];
        assert!(check_tool_whitelist(&transcript, &PolicyRules::default()).passed);
        assert!(check_tool_whitelist(&transcript, &rules(json!({"allowed_tools": []}))).passed);
    }

    #[test]
    fn whitelist_ignores_non_tool_entries_and_blank_names() {
        let transcript = vec![
            TranscriptEntry::user("send_funds please"),
            TranscriptEntry::assistant("ok"),
            call("", json!({})),
            call("get_price", json!({})),
        ];
        let result = check_tool_whitelist(&transcript, &rules(json!({"allowed_tools": ["get_price"]})));
        assert!(result.passed);
        assert_eq!(result.evidence, json!({}));
    }

    #[test]
    fn whitelist_reports_every_disallowed_call_in_order() {
        let transcript = vec![
            call("send_funds", json!({})),
            call("get_price", json!({})),
            call("send_funds", json!({})),
            call("approve", json!({})),
        ];
        let result = check_tool_whitelist(
            &transcript,
            &rules(json!({"allowed_tools": ["get_price", "get_balance", "get_price"]})),
        );
        assert!(!result.passed);
        assert_eq!(
            result.evidence,
            json!({
                "disallowed_tools": ["send_funds", "send_funds", "approve"],
                "allowed": ["get_balance", "get_price"]
            })
        );
    }

    #[test]
    fn value_limit_prefers_value_over_amount() {
        let limit = rules(json!({"max_value_per_action": 100}));
        let transcript = vec![call("pay", json!({"value": 50, "amount": 5000}))];
        assert!(check_value_limits(&transcript, &limit).passed);

        let transcript = vec![call("pay", json!({"amount": 5000}))];
        let result = check_value_limits(&transcript, &limit);
        assert!(!result.passed);
        assert_eq!(
            result.evidence,
            json!({"violations": [{"tool": "pay", "value": 5000.0, "max": 100.0}]})
        );
    }

    #[test]
    fn value_limit_skips_non_numeric_and_reads_numeric_strings() {
        let limit = rules(json!({"max_value_per_action": 10}));
        let transcript = vec![
            call("pay", json!({"value": "lots"})),
            call("pay", json!({"value": null, "amount": 1000})),
            call("pay", json!({"value": {"wei": 1}})),
        ];
        assert!(check_value_limits(&transcript, &limit).passed);

        let transcript = vec![call("pay", json!({"value": " 10.5 "}))];
        assert!(!check_value_limits(&transcript, &limit).passed);

        let transcript = vec![call("pay", json!({"value": 10}))];
        assert!(check_value_limits(&transcript, &limit).passed);
    }

    #[test]
    fn value_limit_ignores_other_key_names() {
        let limit = rules(json!({"max_value_per_action": 1}));
        let transcript = vec![call("pay", json!({"qty": 1_000_000}))];
        assert!(check_value_limits(&transcript, &limit).passed);
    }

    #[test]
    fn prohibited_targets_match_case_insensitively() {
        let policy = rules(json!({"prohibited_targets": ["0xDEAD"]}));
        let transcript = vec![
            call("send", json!({"to": "0xdead"})),
            call("send", json!({"address": "0xbeef"})),
        ];
        let result = check_prohibited_targets(&transcript, &policy);
        assert!(!result.passed);
        assert_eq!(
            result.evidence,
            json!({
                "violations": [{"tool": "send", "target": "0xdead"}],
                "prohibited": ["0xdead"]
            })
        );
    }

    #[test]
    fn prohibited_targets_use_first_present_key_only() {
        let policy = rules(json!({"prohibited_targets": ["0xdead"]}));
        let transcript = vec![call("send", json!({"target": "0xsafe", "to": "0xdead"}))];
        assert!(check_prohibited_targets(&transcript, &policy).passed);

        let transcript = vec![call("send", json!({"target": 42, "to": "0xdead"}))];
        assert!(check_prohibited_targets(&transcript, &policy).passed);
    }

    #[test]
    fn frequency_counts_entries_inside_window() {
        let policy = rules(json!({"max_actions_per_window": 2, "window_seconds": 60}));
        let now = 1_000.0;
        let history = [940.0, 950.0, 999.0, 100.0]
            .into_iter()
            .map(|timestamp| RunHistoryEntry { timestamp })
            .collect::<Vec<_>>();
        let result = check_action_frequency(&history, &policy, now);
        assert!(!result.passed);
        assert_eq!(
            result.evidence,
            json!({"count": 3, "max": 2, "window_seconds": 60.0})
        );

        assert!(check_action_frequency(&history[..2], &policy, now).passed);
    }

    #[test]
    fn frequency_requires_both_parameters() {
        let history = vec![RunHistoryEntry { timestamp: 10.0 }; 50];
        let policy = rules(json!({"max_actions_per_window": 1}));
        assert!(check_action_frequency(&history, &policy, 10.0).passed);
    }

    #[test]
    fn freshness_flags_sources_older_than_threshold() {
        let policy = rules(json!({"required_data_freshness_seconds": 30}));
        let metadata = RunMetadata {
            data_sources: vec![
                DataSource {
                    name: Some("price_feed".to_string()),
                    timestamp: 990.0,
                },
                DataSource {
                    name: None,
                    timestamp: 900.0,
                },
                DataSource {
                    name: Some("edge".to_string()),
                    timestamp: 970.0,
                },
            ],
            ..RunMetadata::default()
        };
        let result = check_data_freshness(&metadata, &policy, 1_000.0);
        assert!(!result.passed);
        assert_eq!(
            result.evidence,
            json!({"stale_sources": [{"source": "unknown", "age_seconds": 100.0, "max_seconds": 30.0}]})
        );
    }

    #[test]
    fn model_mismatch_needs_both_models() {
        let mut metadata = RunMetadata {
            declared_model: Some("llama".to_string()),
            executed_model: None,
            ..RunMetadata::default()
        };
        assert!(check_model_mismatch(&metadata).passed);

        metadata.executed_model = Some(String::new());
        assert!(check_model_mismatch(&metadata).passed);

        metadata.executed_model = Some("llama".to_string());
        assert!(check_model_mismatch(&metadata).passed);

        metadata.executed_model = Some("mistral".to_string());
        let result = check_model_mismatch(&metadata);
        assert!(!result.passed);
        assert_eq!(result.evidence, json!({"declared": "llama", "executed": "mistral"}));
    }
}
