use super::model::{
    AgentRecord, AgentStatus, ClaimRecord, PolicyRecord, ReasonCode, ReputationSnapshotRecord,
    RunRecord, RunVerdict,
};
use crate::service::claim_verifier_service::VerificationResult;
use crate::service::executor_service::SimulatedToolCall;
use crate::service::reputation_service::ScoreResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warranty_settlement::models::CollateralHealth;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub persistence_enabled: bool,
    pub settlement_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    pub wallet_address: String,
    pub metadata_uri: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterAgentResponse {
    pub accepted: bool,
    pub agent: Option<AgentRecord>,
    pub operator_id: Option<u64>,
    /// Only present the first time an operator wallet is seen.
    pub api_key: Option<String>,
    pub chain_tx: Option<String>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentLookupResponse {
    pub found: bool,
    pub agent: Option<AgentRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentListResponse {
    pub agents: Vec<AgentRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAgentStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStatusResponse {
    pub accepted: bool,
    pub agent_id: u64,
    pub status: Option<AgentStatus>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureWebhookRequest {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfigResponse {
    pub accepted: bool,
    pub agent_id: u64,
    pub operator_id: Option<u64>,
    pub webhook_url: Option<String>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollateralResponse {
    pub agent_id: u64,
    pub available: bool,
    pub collateral: Option<CollateralHealth>,
    pub error_code: Option<String>,
    pub reason: String,
}

/// `rules` stays untyped here so malformed documents surface as
/// `INVALID_POLICY_RULES` instead of an extractor rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPolicyRequest {
    pub agent_id: u64,
    pub rules: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterPolicyResponse {
    pub accepted: bool,
    pub policy: Option<PolicyRecord>,
    pub deprecated_policy_ids: Vec<u64>,
    pub chain_tx: Option<String>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatePolicyRequest {
    pub agent_id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivatePolicyResponse {
    pub accepted: bool,
    pub policy: Option<PolicyRecord>,
    pub deprecated_policy_ids: Vec<u64>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyLookupResponse {
    pub found: bool,
    pub policy: Option<PolicyRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPoliciesQuery {
    pub agent_id: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyListResponse {
    pub policies: Vec<PolicyRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRunRequest {
    pub agent_id: u64,
    pub user_input: String,
    #[serde(default)]
    pub user_address: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub simulate_tools: Vec<SimulatedToolCall>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRunResponse {
    pub accepted: bool,
    pub run: Option<RunRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLookupResponse {
    pub found: bool,
    pub run: Option<RunRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRunsQuery {
    pub agent_id: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub agent_id: u64,
    pub verdict: RunVerdict,
    pub reason_codes: Vec<ReasonCode>,
    pub settlement_ref: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunListResponse {
    pub runs: Vec<RunSummary>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayRunResponse {
    pub found: bool,
    pub run_id: String,
    pub proof_valid: bool,
    pub input_hash_match: bool,
    pub output_hash_match: bool,
    pub policy_id: Option<u64>,
    pub policy_verdict: Option<RunVerdict>,
    pub reason_codes: Vec<ReasonCode>,
    pub evidence_hash: String,
    pub original_verdict: Option<RunVerdict>,
    pub original_reason_codes: Vec<ReasonCode>,
    pub original_evidence_hash: String,
    pub verdict_matches: bool,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitClaimRequest {
    pub run_id: String,
    pub claimant_address: String,
    pub reason_code: String,
    #[serde(default)]
    pub evidence: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitClaimResponse {
    pub accepted: bool,
    pub claim: Option<ClaimRecord>,
    pub verification: Option<VerificationResult>,
    /// True when a settlement task was scheduled for this claim.
    pub settlement_pending: bool,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimLookupResponse {
    pub found: bool,
    pub claim: Option<ClaimRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListClaimsQuery {
    pub agent_id: Option<u64>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimListResponse {
    pub claims: Vec<ClaimRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub found: bool,
    pub score: Option<ScoreResult>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreHistoryResponse {
    pub agent_id: u64,
    pub snapshots: Vec<ReputationSnapshotRecord>,
    pub error_code: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardStatsResponse {
    pub total_agents: u64,
    pub total_runs: u64,
    pub total_claims: u64,
    pub paid_claims: u64,
    pub total_violations: u64,
    pub error_code: Option<String>,
    pub reason: String,
}
