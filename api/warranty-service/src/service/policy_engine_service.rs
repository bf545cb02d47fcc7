use crate::module::warranty::model::{PolicyRules, ReasonCode, RunHistoryEntry, RunMetadata, TranscriptEntry};
use crate::service::evidence_hash_service::content_hash;
use crate::service::policy_rules_service::{
    check_action_frequency, check_data_freshness, check_model_mismatch, check_prohibited_targets,
    check_tool_whitelist, check_value_limits, RuleResult,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub passed: bool,
    pub results: Vec<RuleResult>,
    pub failed_codes: Vec<ReasonCode>,
    pub evidence_hash: String,
}

/// Everything a verdict depends on. `now` is part of the input so that a
/// stored run can be re-evaluated at the instant it was first judged.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub transcript: &'a [TranscriptEntry],
    pub rules: &'a PolicyRules,
    pub run_history: &'a [RunHistoryEntry],
    pub run_metadata: &'a RunMetadata,
    pub now: f64,
}

/// Runs the six checks in their fixed order. The evidence hash covers the
/// `{code, passed, evidence}` triple of every check, so identical inputs give
/// an identical hash on any host.
pub fn evaluate_policy(input: EvaluationInput<'_>) -> Result<PolicyVerdict, String> {
    let results = vec![
        check_tool_whitelist(input.transcript, input.rules),
        check_value_limits(input.transcript, input.rules),
        check_prohibited_targets(input.transcript, input.rules),
        check_action_frequency(input.run_history, input.rules, input.now),
        check_data_freshness(input.run_metadata, input.rules, input.now),
        check_model_mismatch(input.run_metadata),
    ];

    let failed_codes = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.code)
        .collect::<Vec<_>>();
    let evidence_hash = content_hash(&results)?;

    Ok(PolicyVerdict {
        passed: failed_codes.is_empty(),
        results,
        failed_codes,
        evidence_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    const NOW: f64 = 1_750_000_000.0;

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

    fn evaluate(transcript: &[TranscriptEntry], rules: &PolicyRules) -> PolicyVerdict {
        evaluate_policy(EvaluationInput {
            transcript,
            rules,
            run_history: &[],
            run_metadata: &RunMetadata::default(),
            now: NOW,
        })
        .expect("evaluate")
    }

    #[test]
    fn whitelisted_tool_passes_every_check() {
        let verdict = evaluate(
            &[call("get_price", json!({}))],
            &rules(json!({"allowed_tools": ["get_price"]})),
        );
        assert!(verdict.passed);
        assert!(verdict.failed_codes.is_empty());
        assert_eq!(verdict.results.len(), 6);
        assert_eq!(
            verdict.results.iter().map(|r| r.code).collect::<Vec<_>>(),
            ReasonCode::ALL.to_vec()
        );
    }

    #[test]
    fn send_funds_to_prohibited_target_fails_three_checks_in_order() {
        let verdict = evaluate(
            &[call("send_funds", json!({"value": 9999, "target": "0xdead"}))],
            &rules(json!({
                "allowed_tools": ["get_price"],
                "max_value_per_action": 100,
                "prohibited_targets": ["0xdead"]
            })),
        );
        assert!(!verdict.passed);
        assert_eq!(
            verdict.failed_codes,
            vec![
                ReasonCode::ToolWhitelistViolation,
                ReasonCode::ValueLimitExceeded,
                ReasonCode::ProhibitedTarget,
            ]
        );
    }

    #[test]
    fn evidence_hash_is_stable_for_identical_inputs() {
        let transcript = vec![
            TranscriptEntry::user("buy"),
            call("send_funds", json!({"amount": "250", "to": "0xAbC"})),
        ];
        let policy = rules(json!({
            "allowed_tools": ["b", "a"],
            "max_value_per_action": 100,
            "prohibited_targets": ["0xabc"]
        }));
        let first = evaluate(&transcript, &policy);
        let second = evaluate(&transcript.clone(), &policy.clone());
        assert_eq!(first.evidence_hash, second.evidence_hash);
        assert_eq!(first.evidence_hash.len(), 64);

        let reordered = rules(json!({
            "prohibited_targets": ["0xABC"],
            "max_value_per_action": 100,
            "allowed_tools": ["a", "b", "a"]
        }));
        assert_eq!(evaluate(&transcript, &reordered).evidence_hash, first.evidence_hash);
    }

    #[test]
    fn evidence_hash_covers_the_six_result_triples() {
        let policy = PolicyRules::default();
        let verdict = evaluate(&[], &policy);
        let expected = content_hash(&json!([
            {"code": "TOOL_WHITELIST_VIOLATION", "passed": true, "evidence": {}},
            {"code": "VALUE_LIMIT_EXCEEDED", "passed": true, "evidence": {}},
            {"code": "PROHIBITED_TARGET", "passed": true, "evidence": {}},
            {"code": "FREQUENCY_EXCEEDED", "passed": true, "evidence": {}},
            {"code": "STALE_DATA", "passed": true, "evidence": {}},
            {"code": "MODEL_MISMATCH", "passed": true, "evidence": {}}
        ]))
        .expect("hash");
        assert_eq!(verdict.evidence_hash, expected);
    }

    #[test]
    fn clock_dependent_checks_use_the_injected_instant() {
        let policy = rules(json!({
            "max_actions_per_window": 1,
            "window_seconds": 60,
            "required_data_freshness_seconds": 10
        }));
        let history = vec![
            RunHistoryEntry { timestamp: NOW - 5.0 },
            RunHistoryEntry { timestamp: NOW - 30.0 },
        ];
        let metadata: RunMetadata = serde_json::from_value(json!({
            "data_sources": [{"name": "feed", "timestamp": NOW - 20.0}],
            "declared_model": "m-1",
            "executed_model": "m-2"
        }))
        .expect("metadata");

        let at = |now: f64| {
            evaluate_policy(EvaluationInput {
                transcript: &[],
                rules: &policy,
                run_history: &history,
                run_metadata: &metadata,
                now,
            })
            .expect("evaluate")
        };

        let original = at(NOW);
        assert_eq!(
            original.failed_codes,
            vec![
                ReasonCode::FrequencyExceeded,
                ReasonCode::StaleData,
                ReasonCode::ModelMismatch,
            ]
        );
        assert_eq!(at(NOW), original);

        let later = at(NOW + 3_600.0);
        assert_eq!(
            later.failed_codes,
            vec![ReasonCode::StaleData, ReasonCode::ModelMismatch]
        );
        assert_ne!(later.evidence_hash, original.evidence_hash);
    }
}
