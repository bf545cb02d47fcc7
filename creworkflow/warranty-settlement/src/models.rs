use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AgentRegistration {
    pub metadata_uri: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PolicyRegistration {
    pub chain_agent_id: u64,
    pub policy_hash: String,
    pub rules_uri: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PolicyActivation {
    pub chain_agent_id: u64,
    pub chain_policy_id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClaimSubmission {
    pub run_id: String,
    pub chain_agent_id: u64,
    pub reason_code: String,
    pub evidence_hash: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClaimResolution {
    pub chain_claim_id: u64,
    pub approved: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClaimPayout {
    pub chain_claim_id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ScoreUpdate {
    pub chain_agent_id: u64,
    pub score: u32,
    pub total_runs: u64,
    pub violations: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CollateralQuery {
    pub chain_agent_id: u64,
}

/// An entity created on the settlement layer together with the transaction
/// that created it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RegisteredEntity {
    pub onchain_id: u64,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
}

/// Collateral amounts are decimal wei strings; they do not fit in u64.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CollateralHealth {
    pub staked: String,
    pub reserved: String,
    pub free: String,
    pub ratio_bps: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SettlementAction {
    RegisterAgent(AgentRegistration),
    RegisterPolicy(PolicyRegistration),
    ActivatePolicy(PolicyActivation),
    SubmitClaim(ClaimSubmission),
    ResolveClaim(ClaimResolution),
    ExecutePayout(ClaimPayout),
    UpdateScore(ScoreUpdate),
    CollateralHealth(CollateralQuery),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SettlementOutput {
    Registered(RegisteredEntity),
    Collateral(CollateralHealth),
    Tx(TxReceipt),
}
