use crate::app::AppState;
use crate::module::warranty::crud;
use crate::module::warranty::error::AppError;
use crate::service::evidence_hash_service::content_hash;
use crate::service::notification_service::{notify_operator, WarrantyEvent};
use crate::service::settlement_service::{with_retry, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use warranty_settlement::models::ScoreUpdate;

pub const BASE_SCORE: u32 = 100;
const VIOLATION_WEIGHT: f64 = 60.0;
const CLAIM_WEIGHT: f64 = 30.0;
const RECENCY_STEP: f64 = 0.5;
const RECENCY_CAP: f64 = 10.0;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: u32,
    pub violation_penalty: f64,
    pub claim_penalty: f64,
    pub recency_bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub agent_id: u64,
    pub score: u32,
    pub total_runs: u64,
    pub violations: u64,
    pub paid_claims: u64,
    pub breakdown: ScoreBreakdown,
}

/// Aggregate counts a score is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreInputs {
    pub total_runs: u64,
    pub violations: u64,
    pub paid_claims: u64,
    pub recent_clean_runs: u64,
}

pub fn score_from_inputs(agent_id: u64, inputs: ScoreInputs) -> ScoreResult {
    if inputs.total_runs == 0 {
        return ScoreResult {
            agent_id,
            score: BASE_SCORE,
            total_runs: 0,
            violations: inputs.violations,
            paid_claims: inputs.paid_claims,
            breakdown: ScoreBreakdown {
                base: BASE_SCORE,
                violation_penalty: 0.0,
                claim_penalty: 0.0,
                recency_bonus: 0.0,
            },
        };
    }

    let total = inputs.total_runs as f64;
    let violation_penalty = (inputs.violations as f64 / total * VIOLATION_WEIGHT).min(VIOLATION_WEIGHT);
    let claim_penalty = (inputs.paid_claims as f64 / total * CLAIM_WEIGHT).min(CLAIM_WEIGHT);
    let recency_bonus = (inputs.recent_clean_runs as f64 * RECENCY_STEP).min(RECENCY_CAP);

    let raw = f64::from(BASE_SCORE) - violation_penalty - claim_penalty + recency_bonus;
    let score = raw.round_ties_even().clamp(0.0, f64::from(BASE_SCORE)) as u32;

    ScoreResult {
        agent_id,
        score,
        total_runs: inputs.total_runs,
        violations: inputs.violations,
        paid_claims: inputs.paid_claims,
        breakdown: ScoreBreakdown {
            base: BASE_SCORE,
            violation_penalty: round2(violation_penalty),
            claim_penalty: round2(claim_penalty),
            recency_bonus: round2(recency_bonus),
        },
    }
}

pub fn snapshot_hash(result: &ScoreResult) -> Result<String, AppError> {
    content_hash(result).map_err(|e| AppError::internal("SERIALIZATION_ERROR", e))
}

/// Start of the window in which passing runs earn the recency bonus.
pub fn recency_cutoff(state: &AppState, now: i64) -> i64 {
    let window = i64::try_from(state.config.recency_window_days).unwrap_or(i64::MAX / SECONDS_PER_DAY);
    now.saturating_sub(window.saturating_mul(SECONDS_PER_DAY))
}

pub fn compute_score(state: &AppState, agent_id: u64) -> Result<ScoreResult, AppError> {
    let inputs = crud::score_inputs(&state.store, agent_id, recency_cutoff(state, crud::now_unix()))?;
    Ok(score_from_inputs(agent_id, inputs))
}

/// Records an immutable snapshot and moves the agent's trust score to it.
/// Chain propagation runs detached; its outcome never reaches the caller.
pub async fn snapshot_score(state: &AppState, agent_id: u64) -> Result<ScoreResult, AppError> {
    let now = crud::now_unix();
    let recorded = crud::record_snapshot(&state.store, agent_id, recency_cutoff(state, now), now)?;
    crud::mirror_snapshot(state, &recorded.snapshot).await;
    crud::mirror_agent(state, &recorded.agent).await;

    info!(
        agent_id,
        score = recorded.result.score,
        previous_score = recorded.previous_score,
        snapshot_id = recorded.snapshot.snapshot_id,
        "reputation snapshot recorded"
    );

    if recorded.previous_score != recorded.result.score {
        notify_operator(
            state,
            agent_id,
            WarrantyEvent::ScoreChanged,
            json!({
                "old_score": recorded.previous_score,
                "new_score": recorded.result.score,
                "snapshot_hash": recorded.snapshot.snapshot_hash,
            }),
        );
    }

    if let (Some(settlement), Some(chain_agent_id)) = (state.settlement.clone(), recorded.agent.chain_agent_id) {
        let policy = RetryPolicy::from_config(&state.config);
        let update = ScoreUpdate {
            chain_agent_id,
            score: recorded.result.score,
            total_runs: recorded.result.total_runs,
            violations: recorded.result.violations,
        };
        tokio::spawn(async move {
            match with_retry("updateScore", policy, || settlement.update_score(&update)).await {
                Ok(receipt) => info!(agent_id, tx_hash = %receipt.tx_hash, "score propagated"),
                Err(err) => warn!(agent_id, error = %err, "score propagation dropped"),
            }
        });
    }

    Ok(recorded.result)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn zero_runs_scores_exactly_one_hundred() {
        let result = score_from_inputs(
            7,
            ScoreInputs {
                total_runs: 0,
                violations: 0,
                paid_claims: 0,
                recent_clean_runs: 0,
            },
        );
        assert_eq!(result.score, 100);
        assert_eq!(result.breakdown.violation_penalty, 0.0);
        assert_eq!(result.breakdown.claim_penalty, 0.0);
        assert_eq!(result.breakdown.recency_bonus, 0.0);
    }

    #[test]
    fn mixed_history_scores_ninety_two() {
        let result = score_from_inputs(
            1,
            ScoreInputs {
                total_runs: 20,
                violations: 3,
                paid_claims: 1,
                recent_clean_runs: 4,
            },
        );
        assert!(close(result.breakdown.violation_penalty, 9.0));
        assert!(close(result.breakdown.claim_penalty, 1.5));
        assert!(close(result.breakdown.recency_bonus, 2.0));
        assert_eq!(result.score, 92);
        assert_eq!(result.breakdown.base, 100);
    }

    #[test]
    fn penalties_and_bonus_are_capped() {
        let worst = score_from_inputs(
            1,
            ScoreInputs {
                total_runs: 2,
                violations: 5,
                paid_claims: 9,
                recent_clean_runs: 0,
            },
        );
        assert!(close(worst.breakdown.violation_penalty, 60.0));
        assert!(close(worst.breakdown.claim_penalty, 30.0));
        assert_eq!(worst.score, 10);

        let best = score_from_inputs(
            1,
            ScoreInputs {
                total_runs: 100,
                violations: 0,
                paid_claims: 0,
                recent_clean_runs: 100,
            },
        );
        assert!(close(best.breakdown.recency_bonus, 10.0));
        assert_eq!(best.score, 100);
    }

    #[test]
    fn score_stays_in_bounds_across_counter_grid() {
        for total_runs in 1..=12u64 {
            for violations in 0..=total_runs {
                for paid_claims in 0..=total_runs {
                    for recent_clean_runs in [0u64, 3, 40] {
                        let result = score_from_inputs(
                            1,
                            ScoreInputs {
                                total_runs,
                                violations,
                                paid_claims,
                                recent_clean_runs,
                            },
                        );
                        assert!(result.score <= 100);
                    }
                }
            }
        }
    }

    #[test]
    fn breakdown_terms_round_to_two_decimals() {
        let result = score_from_inputs(
            1,
            ScoreInputs {
                total_runs: 7,
                violations: 1,
                paid_claims: 1,
                recent_clean_runs: 1,
            },
        );
        assert!(close(result.breakdown.violation_penalty, 8.57));
        assert!(close(result.breakdown.claim_penalty, 4.29));
        assert_eq!(result.score, 88);
    }

    #[test]
    fn snapshot_hash_is_content_addressed() {
        let inputs = ScoreInputs {
            total_runs: 4,
            violations: 1,
            paid_claims: 0,
            recent_clean_runs: 3,
        };
        let a = snapshot_hash(&score_from_inputs(2, inputs)).expect("hash");
        let b = snapshot_hash(&score_from_inputs(2, inputs)).expect("hash");
        let other = snapshot_hash(&score_from_inputs(3, inputs)).expect("hash");
        assert_eq!(a, b);
        assert_ne!(a, other);
    }
}
