use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use crate::errors::SettlementError;
use crate::models::{
    AgentRegistration, ClaimPayout, ClaimResolution, ClaimSubmission, CollateralHealth,
    CollateralQuery, PolicyActivation, PolicyRegistration, RegisteredEntity, ScoreUpdate,
    SettlementAction, SettlementOutput, TxReceipt,
};

/// Offline stand-in for the settlement contracts. Transaction hashes are
/// derived from the request contents, so the same request sequence always
/// yields the same receipts.
#[derive(Debug)]
pub struct SimulatedSettlement {
    next_agent_id: AtomicU64,
    next_policy_id: AtomicU64,
    next_claim_id: AtomicU64,
}

impl Default for SimulatedSettlement {
    fn default() -> Self {
        Self {
            next_agent_id: AtomicU64::new(1),
            next_policy_id: AtomicU64::new(1),
            next_claim_id: AtomicU64::new(1),
        }
    }
}

impl SimulatedSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_agent(&self, req: &AgentRegistration) -> Result<RegisteredEntity, SettlementError> {
        validate_agent_registration(req)?;
        let onchain_id = self.next_agent_id.fetch_add(1, Ordering::SeqCst);
        Ok(RegisteredEntity {
            onchain_id,
            tx_hash: hash_hex(&[
                b"registerAgent",
                req.metadata_uri.as_bytes(),
                &onchain_id.to_be_bytes(),
            ]),
        })
    }

    pub fn register_policy(&self, req: &PolicyRegistration) -> Result<RegisteredEntity, SettlementError> {
        validate_policy_registration(req)?;
        let onchain_id = self.next_policy_id.fetch_add(1, Ordering::SeqCst);
        Ok(RegisteredEntity {
            onchain_id,
            tx_hash: hash_hex(&[
                b"registerPolicy",
                &req.chain_agent_id.to_be_bytes(),
                req.policy_hash.as_bytes(),
                req.rules_uri.as_bytes(),
                &onchain_id.to_be_bytes(),
            ]),
        })
    }

    pub fn activate_policy(&self, req: &PolicyActivation) -> Result<TxReceipt, SettlementError> {
        validate_policy_activation(req)?;
        Ok(TxReceipt {
            tx_hash: hash_hex(&[
                b"activatePolicy",
                &req.chain_agent_id.to_be_bytes(),
                &req.chain_policy_id.to_be_bytes(),
            ]),
        })
    }

    pub fn submit_claim(&self, req: &ClaimSubmission) -> Result<RegisteredEntity, SettlementError> {
        validate_claim_submission(req)?;
        let onchain_id = self.next_claim_id.fetch_add(1, Ordering::SeqCst);
        Ok(RegisteredEntity {
            onchain_id,
            tx_hash: hash_hex(&[
                b"submitClaim",
                req.run_id.as_bytes(),
                &req.chain_agent_id.to_be_bytes(),
                req.reason_code.as_bytes(),
                req.evidence_hash.as_bytes(),
            ]),
        })
    }

    pub fn resolve_claim(&self, req: &ClaimResolution) -> Result<TxReceipt, SettlementError> {
        validate_claim_id(req.chain_claim_id)?;
        Ok(TxReceipt {
            tx_hash: hash_hex(&[
                b"verifyClaim",
                &req.chain_claim_id.to_be_bytes(),
                &[u8::from(req.approved)],
            ]),
        })
    }

    pub fn execute_payout(&self, req: &ClaimPayout) -> Result<TxReceipt, SettlementError> {
        validate_claim_id(req.chain_claim_id)?;
        Ok(TxReceipt {
            tx_hash: hash_hex(&[b"executePayout", &req.chain_claim_id.to_be_bytes()]),
        })
    }

    pub fn update_score(&self, req: &ScoreUpdate) -> Result<TxReceipt, SettlementError> {
        validate_score_update(req)?;
        Ok(TxReceipt {
            tx_hash: hash_hex(&[
                b"updateScore",
                &req.chain_agent_id.to_be_bytes(),
                &req.score.to_be_bytes(),
                &req.total_runs.to_be_bytes(),
                &req.violations.to_be_bytes(),
            ]),
        })
    }

    /// The simulation holds no stake, so every agent reports an empty pool.
    pub fn collateral_health(&self, req: &CollateralQuery) -> Result<CollateralHealth, SettlementError> {
        validate_agent_id(req.chain_agent_id)?;
        Ok(CollateralHealth {
            staked: "0".to_string(),
            reserved: "0".to_string(),
            free: "0".to_string(),
            ratio_bps: 0,
        })
    }

    pub fn dispatch(&self, action: &SettlementAction) -> Result<SettlementOutput, SettlementError> {
        let out = match action {
            SettlementAction::RegisterAgent(req) => SettlementOutput::Registered(self.register_agent(req)?),
            SettlementAction::RegisterPolicy(req) => SettlementOutput::Registered(self.register_policy(req)?),
            SettlementAction::ActivatePolicy(req) => SettlementOutput::Tx(self.activate_policy(req)?),
            SettlementAction::SubmitClaim(req) => SettlementOutput::Registered(self.submit_claim(req)?),
            SettlementAction::ResolveClaim(req) => SettlementOutput::Tx(self.resolve_claim(req)?),
            SettlementAction::ExecutePayout(req) => SettlementOutput::Tx(self.execute_payout(req)?),
            SettlementAction::UpdateScore(req) => SettlementOutput::Tx(self.update_score(req)?),
            SettlementAction::CollateralHealth(req) => {
                SettlementOutput::Collateral(self.collateral_health(req)?)
            }
        };
        Ok(out)
    }
}

pub fn validate_agent_registration(req: &AgentRegistration) -> Result<(), SettlementError> {
    if req.metadata_uri.trim().is_empty() {
        return Err(SettlementError::InvalidRequest(
            "metadata_uri cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_policy_registration(req: &PolicyRegistration) -> Result<(), SettlementError> {
    validate_agent_id(req.chain_agent_id)?;
    if req.policy_hash.trim().is_empty() {
        return Err(SettlementError::InvalidRequest(
            "policy_hash cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_policy_activation(req: &PolicyActivation) -> Result<(), SettlementError> {
    validate_agent_id(req.chain_agent_id)?;
    if req.chain_policy_id == 0 {
        return Err(SettlementError::InvalidRequest(
            "chain_policy_id must be non-zero".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_claim_submission(req: &ClaimSubmission) -> Result<(), SettlementError> {
    validate_agent_id(req.chain_agent_id)?;
    if req.run_id.trim().is_empty() {
        return Err(SettlementError::InvalidRequest("run_id cannot be empty".to_string()));
    }
    if req.reason_code.trim().is_empty() {
        return Err(SettlementError::InvalidRequest(
            "reason_code cannot be empty".to_string(),
        ));
    }
    if req.evidence_hash.trim().is_empty() {
        return Err(SettlementError::InvalidRequest(
            "evidence_hash cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_score_update(req: &ScoreUpdate) -> Result<(), SettlementError> {
    validate_agent_id(req.chain_agent_id)?;
    if req.score > 100 {
        return Err(SettlementError::InvalidRequest(format!(
            "score {} is outside 0..=100",
            req.score
        )));
    }
    if req.violations > req.total_runs {
        return Err(SettlementError::InvalidRequest(
            "violations cannot exceed total_runs".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_agent_id(chain_agent_id: u64) -> Result<(), SettlementError> {
    if chain_agent_id == 0 {
        return Err(SettlementError::InvalidRequest(
            "chain_agent_id must be non-zero".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_claim_id(chain_claim_id: u64) -> Result<(), SettlementError> {
    if chain_claim_id == 0 {
        return Err(SettlementError::InvalidRequest(
            "chain_claim_id must be non-zero".to_string(),
        ));
    }
    Ok(())
}

fn hash_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("0x{}", hex::encode(hasher.finalize()))
}
