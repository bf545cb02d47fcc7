use crate::module::warranty::crud::{self, WarrantyStore};
use crate::module::warranty::error::AppError;
use crate::module::warranty::model::{ClaimStatus, ReasonCode};
use crate::service::policy_engine_service::{evaluate_policy, EvaluationInput};
use serde::{Deserialize, Serialize};

/// `valid` says whether the claim could be judged at all; `approved` is the
/// judgement. `evidence_hash` is the fresh evaluation's hash, empty when no
/// evaluation ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub approved: bool,
    pub reason: String,
    pub evidence_hash: String,
}

impl VerificationResult {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            approved: false,
            reason: reason.into(),
            evidence_hash: String::new(),
        }
    }

    fn inconclusive(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            ..Self::invalid(reason)
        }
    }
}

/// Re-evaluates the claimed run's stored transcript and evaluation context
/// against the agent's current active policy and approves the claim iff the
/// claimed code is among the fresh failures. Read-only.
pub fn verify_claim(store: &WarrantyStore, claim_id: u64) -> Result<VerificationResult, AppError> {
    let Some(claim) = crud::claim_by_id(store, claim_id)? else {
        return Ok(VerificationResult::invalid("Claim not found"));
    };
    if claim.status != ClaimStatus::Submitted {
        return Ok(VerificationResult::invalid(format!(
            "Invalid claim status: {}",
            claim.status.as_str()
        )));
    }
    let Some(code) = ReasonCode::parse(&claim.reason_code) else {
        return Ok(VerificationResult::inconclusive(format!(
            "Invalid reason code: {}",
            claim.reason_code
        )));
    };
    let Some(run) = crud::run_by_id(store, &claim.run_id)? else {
        return Ok(VerificationResult::inconclusive("Referenced run not found"));
    };

    let rules = crud::active_policy_for_agent(store, run.agent_id)?
        .map(|policy| policy.rules)
        .unwrap_or_default();
    let verdict = evaluate_policy(EvaluationInput {
        transcript: &run.transcript,
        rules: &rules,
        run_history: &run.run_history,
        run_metadata: &run.run_metadata,
        now: run.evaluated_at,
    })
    .map_err(|e| AppError::internal("EVALUATION_ERROR", e))?;

    let approved = verdict.failed_codes.contains(&code);
    let reason = if approved {
        format!("Violation confirmed: {}", code.as_str())
    } else {
        format!("Claimed violation {} not found in re-evaluation", code.as_str())
    };

    Ok(VerificationResult {
        valid: true,
        approved,
        reason,
        evidence_hash: verdict.evidence_hash,
    })
}
