use super::error::AppError;
use super::model::{
    AgentRecord, AgentStatus, ClaimRecord, ClaimStatus, ClaimTransition, OperatorRecord,
    PolicyRecord, PolicyRules, PolicyStatus, ReasonCode, ReputationSnapshotRecord,
    RunHistoryEntry, RunRecord, RunVerdict,
};
use super::schema::{
    ActivatePolicyRequest, ActivatePolicyResponse, AgentListResponse, AgentLookupResponse,
    AgentStatusResponse, ClaimListResponse, ClaimLookupResponse, CollateralResponse,
    ConfigureWebhookRequest, DashboardStatsResponse, ExecuteRunRequest, ExecuteRunResponse,
    HistoryQuery, ListClaimsQuery, ListPoliciesQuery, ListRunsQuery, PolicyListResponse,
    PolicyLookupResponse, RegisterAgentRequest, RegisterAgentResponse, RegisterPolicyRequest,
    RegisterPolicyResponse, ReplayRunResponse, RunListResponse, RunLookupResponse, RunSummary,
    ScoreHistoryResponse, ScoreResponse, SetAgentStatusRequest, SubmitClaimRequest,
    SubmitClaimResponse, WebhookConfigResponse,
};
use crate::app::AppState;
use crate::infra::{
    AGENTS_COLLECTION, CLAIMS_COLLECTION, OPERATORS_COLLECTION, POLICIES_COLLECTION,
    RUNS_COLLECTION, SNAPSHOTS_COLLECTION,
};
use crate::service::claim_verifier_service::verify_claim;
use crate::service::evidence_hash_service::content_hash;
use crate::service::notification_service::{notify_operator, WarrantyEvent};
use crate::service::operator_auth_service::{authorize_operator, generate_api_key, read_api_key};
use crate::service::orchestrator_service;
use crate::service::reputation_service::{
    compute_score, score_from_inputs, snapshot_hash, snapshot_score, ScoreInputs, ScoreResult,
};
use crate::service::settlement_service::{with_retry, RetryPolicy, SettlementLayer};
use crate::service::validation_service::{
    normalize_wallet_address, validate_metadata_uri, validate_policy_rules, validate_webhook_url,
};
use axum::http::HeaderMap;
use chrono::Utc;
use mongodb::bson::Document;
use mongodb::Collection;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};
use warranty_settlement::models::{
    AgentRegistration, ClaimPayout, ClaimResolution, ClaimSubmission, CollateralQuery,
    PolicyActivation, PolicyRegistration,
};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;
const DEFAULT_HISTORY_SIZE: usize = 20;

/// Authoritative state. Every counter update, uniqueness check and policy
/// status change happens under the one lock.
#[derive(Debug, Default)]
pub struct WarrantyStore {
    inner: Mutex<WarrantyStoreInner>,
}

#[derive(Debug, Default)]
struct WarrantyStoreInner {
    operators: BTreeMap<u64, OperatorRecord>,
    operator_by_wallet: HashMap<String, u64>,
    agents: BTreeMap<u64, AgentRecord>,
    policies: BTreeMap<u64, PolicyRecord>,
    runs: Vec<RunRecord>,
    run_index: HashMap<String, usize>,
    claims: BTreeMap<u64, ClaimRecord>,
    claim_by_run: HashMap<String, u64>,
    snapshots: Vec<ReputationSnapshotRecord>,
    next_operator_id: u64,
    next_agent_id: u64,
    next_policy_id: u64,
    next_claim_id: u64,
    next_snapshot_id: u64,
}

impl WarrantyStoreInner {
    fn run(&self, run_id: &str) -> Option<&RunRecord> {
        self.run_index.get(run_id).and_then(|idx| self.runs.get(*idx))
    }

    fn score_inputs(&self, agent_id: u64, recent_since: i64) -> Result<ScoreInputs, AppError> {
        let agent = self
            .agents
            .get(&agent_id)
            .ok_or_else(|| agent_not_found(agent_id))?;
        let paid_claims = self
            .claims
            .values()
            .filter(|c| c.agent_id == agent_id && c.status == ClaimStatus::Paid)
            .count() as u64;
        let recent_clean_runs = self
            .runs
            .iter()
            .filter(|r| r.agent_id == agent_id && r.verdict == RunVerdict::Pass && r.created_at >= recent_since)
            .count() as u64;
        Ok(ScoreInputs {
            total_runs: agent.total_runs,
            violations: agent.violations,
            paid_claims,
            recent_clean_runs,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecordedSnapshot {
    pub result: ScoreResult,
    pub snapshot: ReputationSnapshotRecord,
    pub previous_score: u32,
    pub agent: AgentRecord,
}

#[derive(Debug, Clone)]
struct PolicyActivationOutcome {
    policy: PolicyRecord,
    deprecated: Vec<PolicyRecord>,
}

pub async fn register_agent(state: &AppState, req: RegisterAgentRequest) -> Result<RegisterAgentResponse, AppError> {
    let wallet_address = normalize_wallet_address(&req.wallet_address)?;
    validate_metadata_uri(&req.metadata_uri)?;
    validate_webhook_url(req.webhook_url.as_deref())?;

    let now = now_unix();
    let (operator, agent, api_key) = {
        let mut guard = lock_store(&state.store)?;
        let inner = &mut *guard;

        let (operator_id, api_key) = match inner.operator_by_wallet.get(&wallet_address).copied() {
            Some(id) => (id, None),
            None => {
                let id = next_id(&mut inner.next_operator_id);
                let api_key = generate_api_key();
                inner.operators.insert(
                    id,
                    OperatorRecord {
                        operator_id: id,
                        wallet_address: wallet_address.clone(),
                        webhook_url: None,
                        api_key: api_key.clone(),
                        created_at: now,
                    },
                );
                inner.operator_by_wallet.insert(wallet_address.clone(), id);
                (id, Some(api_key))
            }
        };
        let operator = inner
            .operators
            .get_mut(&operator_id)
            .ok_or_else(|| AppError::internal("STORE_INCONSISTENT", "wallet index points at a missing operator"))?;
        if req.webhook_url.is_some() {
            operator.webhook_url = req.webhook_url.clone();
        }
        let operator = operator.clone();

        let agent_id = next_id(&mut inner.next_agent_id);
        let agent = AgentRecord {
            agent_id,
            operator_id,
            metadata_uri: req.metadata_uri.trim().to_string(),
            status: AgentStatus::Active,
            trust_score: 100,
            total_runs: 0,
            violations: 0,
            chain_agent_id: None,
            created_at: now,
        };
        inner.agents.insert(agent_id, agent.clone());
        (operator, agent, api_key)
    };

    mirror_operator(state, &operator).await;
    mirror_agent(state, &agent).await;
    info!(agent_id = agent.agent_id, operator_id = operator.operator_id, new_operator = api_key.is_some(), "agent registered");

    let (agent, chain_tx) = match register_agent_onchain(state, &agent).await {
        Some((updated, tx_hash)) => (updated, Some(tx_hash)),
        None => (agent, None),
    };

    Ok(RegisterAgentResponse {
        accepted: true,
        agent: Some(agent),
        operator_id: Some(operator.operator_id),
        api_key,
        chain_tx,
        error_code: None,
        reason: "agent registered".to_string(),
    })
}

pub async fn get_agent(state: &AppState, agent_id: u64) -> Result<AgentLookupResponse, AppError> {
    let agent = agent_by_id(&state.store, agent_id)?.ok_or_else(|| agent_not_found(agent_id))?;
    Ok(AgentLookupResponse {
        found: true,
        agent: Some(agent),
        error_code: None,
        reason: "agent found".to_string(),
    })
}

pub async fn list_agents(state: &AppState) -> Result<AgentListResponse, AppError> {
    let inner = lock_store(&state.store)?;
    Ok(AgentListResponse {
        agents: inner.agents.values().rev().cloned().collect(),
        error_code: None,
        reason: "ok".to_string(),
    })
}

pub async fn set_agent_status(
    state: &AppState,
    headers: &HeaderMap,
    agent_id: u64,
    req: SetAgentStatusRequest,
) -> Result<AgentStatusResponse, AppError> {
    authorize_agent_owner(&state.store, headers, agent_id)?;
    let status = AgentStatus::parse(req.status.trim()).ok_or_else(|| {
        AppError::bad_request("INVALID_AGENT_STATUS", format!("Invalid status: {}", req.status))
    })?;

    let agent = {
        let mut inner = lock_store(&state.store)?;
        let agent = inner
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| agent_not_found(agent_id))?;
        agent.status = status;
        agent.clone()
    };
    mirror_agent(state, &agent).await;
    info!(agent_id, status = status.as_str(), "agent status changed");

    Ok(AgentStatusResponse {
        accepted: true,
        agent_id,
        status: Some(agent.status),
        error_code: None,
        reason: "agent status updated".to_string(),
    })
}

pub async fn configure_webhook(
    state: &AppState,
    headers: &HeaderMap,
    agent_id: u64,
    req: ConfigureWebhookRequest,
) -> Result<WebhookConfigResponse, AppError> {
    let agent = authorize_agent_owner(&state.store, headers, agent_id)?;
    let webhook_url = req
        .webhook_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());
    validate_webhook_url(webhook_url.as_deref())?;

    let operator = {
        let mut inner = lock_store(&state.store)?;
        let operator = inner
            .operators
            .get_mut(&agent.operator_id)
            .ok_or_else(|| AppError::not_found("OPERATOR_NOT_FOUND", "Operator not found"))?;
        operator.webhook_url = webhook_url;
        operator.clone()
    };
    mirror_operator(state, &operator).await;

    Ok(WebhookConfigResponse {
        accepted: true,
        agent_id,
        operator_id: Some(operator.operator_id),
        webhook_url: operator.webhook_url,
        error_code: None,
        reason: "webhook configured".to_string(),
    })
}

pub async fn get_collateral(state: &AppState, agent_id: u64) -> Result<CollateralResponse, AppError> {
    let agent = agent_by_id(&state.store, agent_id)?.ok_or_else(|| agent_not_found(agent_id))?;
    let unavailable = |reason: String| CollateralResponse {
        agent_id,
        available: false,
        collateral: None,
        error_code: None,
        reason,
    };

    let Some(settlement) = state.settlement.clone() else {
        return Ok(unavailable("settlement layer not configured".to_string()));
    };
    let Some(chain_agent_id) = agent.chain_agent_id else {
        return Ok(unavailable("agent is not registered on chain".to_string()));
    };

    let query = CollateralQuery { chain_agent_id };
    let policy = RetryPolicy::from_config(&state.config);
    match with_retry("collateralHealth", policy, || settlement.collateral_health(&query)).await {
        Ok(collateral) => Ok(CollateralResponse {
            agent_id,
            available: true,
            collateral: Some(collateral),
            error_code: None,
            reason: "ok".to_string(),
        }),
        Err(err) => Ok(unavailable(format!("collateral read failed: {err}"))),
    }
}

pub async fn register_policy(
    state: &AppState,
    headers: &HeaderMap,
    req: RegisterPolicyRequest,
) -> Result<RegisterPolicyResponse, AppError> {
    let agent = authorize_agent_owner(&state.store, headers, req.agent_id)?;
    let rules: PolicyRules = serde_json::from_value(req.rules)
        .map_err(|e| AppError::bad_request("INVALID_POLICY_RULES", format!("invalid rules document: {e}")))?;
    validate_policy_rules(&rules)?;
    let policy_hash = content_hash(&rules).map_err(|e| AppError::internal("SERIALIZATION_ERROR", e))?;

    let now = now_unix();
    let (policy, deprecated) = {
        let mut guard = lock_store(&state.store)?;
        let inner = &mut *guard;
        if !inner.agents.contains_key(&agent.agent_id) {
            return Err(agent_not_found(agent.agent_id));
        }

        let mut deprecated = Vec::new();
        for sibling in inner.policies.values_mut() {
            if sibling.agent_id == agent.agent_id && sibling.status == PolicyStatus::Active {
                sibling.status = PolicyStatus::Deprecated;
                deprecated.push(sibling.clone());
            }
        }

        let policy_id = next_id(&mut inner.next_policy_id);
        let policy = PolicyRecord {
            policy_id,
            agent_id: agent.agent_id,
            policy_hash,
            rules,
            status: PolicyStatus::Active,
            chain_policy_id: None,
            created_at: now,
        };
        inner.policies.insert(policy_id, policy.clone());
        (policy, deprecated)
    };

    for old in &deprecated {
        mirror_policy(state, old).await;
    }
    mirror_policy(state, &policy).await;
    info!(
        policy_id = policy.policy_id,
        agent_id = policy.agent_id,
        policy_hash = %policy.policy_hash,
        deprecated = deprecated.len(),
        "policy registered"
    );

    let (policy, chain_tx) = match register_policy_onchain(state, &agent, &policy).await {
        Some((updated, tx_hash)) => (updated, Some(tx_hash)),
        None => (policy, None),
    };

    Ok(RegisterPolicyResponse {
        accepted: true,
        policy: Some(policy),
        deprecated_policy_ids: deprecated.iter().map(|p| p.policy_id).collect(),
        chain_tx,
        error_code: None,
        reason: "policy registered and active".to_string(),
    })
}

/// Confirms the policy as the agent's active one. Deprecation is one-way, so
/// this either succeeds idempotently or is refused.
pub async fn activate_policy(
    state: &AppState,
    headers: &HeaderMap,
    policy_id: u64,
    req: ActivatePolicyRequest,
) -> Result<ActivatePolicyResponse, AppError> {
    let agent = authorize_agent_owner(&state.store, headers, req.agent_id)?;
    let outcome = activate_policy_in_memory(&state.store, policy_id, agent.agent_id)?;

    for old in &outcome.deprecated {
        mirror_policy(state, old).await;
    }
    info!(
        policy_id,
        agent_id = agent.agent_id,
        deprecated = outcome.deprecated.len(),
        "policy activation confirmed"
    );

    Ok(ActivatePolicyResponse {
        accepted: true,
        policy: Some(outcome.policy),
        deprecated_policy_ids: outcome.deprecated.iter().map(|p| p.policy_id).collect(),
        error_code: None,
        reason: "policy is active".to_string(),
    })
}

pub async fn get_policy(state: &AppState, policy_id: u64) -> Result<PolicyLookupResponse, AppError> {
    let policy = lock_store(&state.store)?
        .policies
        .get(&policy_id)
        .cloned()
        .ok_or_else(|| policy_not_found(policy_id))?;
    Ok(PolicyLookupResponse {
        found: true,
        policy: Some(policy),
        error_code: None,
        reason: "policy found".to_string(),
    })
}

pub async fn list_policies(state: &AppState, query: ListPoliciesQuery) -> Result<PolicyListResponse, AppError> {
    let inner = lock_store(&state.store)?;
    let policies = inner
        .policies
        .values()
        .rev()
        .filter(|p| query.agent_id.map_or(true, |id| p.agent_id == id))
        .cloned()
        .collect();
    Ok(PolicyListResponse {
        policies,
        error_code: None,
        reason: "ok".to_string(),
    })
}

pub async fn execute_run(state: &AppState, req: ExecuteRunRequest) -> Result<ExecuteRunResponse, AppError> {
    let run = orchestrator_service::execute_run(state, req).await?;
    let reason = match run.verdict {
        RunVerdict::Pass => "run passed policy evaluation".to_string(),
        RunVerdict::Fail => format!(
            "run violated policy: {}",
            run.reason_codes.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
        ),
    };
    Ok(ExecuteRunResponse {
        accepted: true,
        run: Some(run),
        error_code: None,
        reason,
    })
}

pub async fn get_run(state: &AppState, run_id: &str) -> Result<RunLookupResponse, AppError> {
    let run = run_by_id(&state.store, run_id)?.ok_or_else(|| run_not_found(run_id))?;
    Ok(RunLookupResponse {
        found: true,
        run: Some(run),
        error_code: None,
        reason: "run found".to_string(),
    })
}

pub async fn list_runs(state: &AppState, query: ListRunsQuery) -> Result<RunListResponse, AppError> {
    let limit = page_size(query.limit, DEFAULT_PAGE_SIZE);
    let inner = lock_store(&state.store)?;
    let runs = inner
        .runs
        .iter()
        .rev()
        .filter(|r| query.agent_id.map_or(true, |id| r.agent_id == id))
        .take(limit)
        .map(|r| RunSummary {
            run_id: r.run_id.clone(),
            agent_id: r.agent_id,
            verdict: r.verdict,
            reason_codes: r.reason_codes.clone(),
            settlement_ref: r.settlement_ref.clone(),
            created_at: r.created_at,
        })
        .collect();
    Ok(RunListResponse {
        runs,
        error_code: None,
        reason: "ok".to_string(),
    })
}

pub async fn replay_run(state: &AppState, run_id: &str) -> Result<ReplayRunResponse, AppError> {
    orchestrator_service::replay_run(state, run_id).await
}

pub async fn submit_claim(state: &AppState, req: SubmitClaimRequest) -> Result<SubmitClaimResponse, AppError> {
    let reason_code = ReasonCode::parse(req.reason_code.trim()).ok_or_else(|| {
        AppError::bad_request("INVALID_REASON_CODE", format!("Invalid reason code: {}", req.reason_code))
    })?;
    let claimant_address = normalize_wallet_address(&req.claimant_address)?;
    let evidence = req.evidence.unwrap_or_else(|| Value::Object(Map::new()));
    if !evidence.is_object() {
        return Err(AppError::bad_request("INVALID_EVIDENCE", "evidence must be a JSON object"));
    }
    let evidence_hash = content_hash(&evidence).map_err(|e| AppError::internal("SERIALIZATION_ERROR", e))?;

    let now = now_unix();
    let claim = {
        let mut guard = lock_store(&state.store)?;
        let inner = &mut *guard;
        let run_id = req.run_id.trim();
        let agent_id = inner.run(run_id).map(|r| r.agent_id).ok_or_else(|| run_not_found(run_id))?;
        if let Some(existing) = inner.claim_by_run.get(run_id) {
            return Err(AppError::conflict(
                "CLAIM_ALREADY_EXISTS",
                format!("run {run_id} already has claim {existing}"),
            ));
        }

        let claim_id = next_id(&mut inner.next_claim_id);
        let claim = ClaimRecord {
            claim_id,
            run_id: run_id.to_string(),
            agent_id,
            claimant_address,
            reason_code: reason_code.as_str().to_string(),
            evidence_hash,
            status: ClaimStatus::Submitted,
            payout_amount_wei: None,
            verification_hash: None,
            chain_claim_id: None,
            resolved_at: None,
            created_at: now,
            transitions: Vec::new(),
        };
        inner.claim_by_run.insert(claim.run_id.clone(), claim_id);
        inner.claims.insert(claim_id, claim.clone());
        claim
    };

    mirror_claim(state, &claim).await;
    info!(claim_id = claim.claim_id, run_id = %claim.run_id, reason_code = %claim.reason_code, "claim submitted");
    notify_operator(
        state,
        claim.agent_id,
        WarrantyEvent::ClaimSubmitted,
        json!({
            "claim_id": claim.claim_id,
            "run_id": claim.run_id,
            "reason_code": claim.reason_code,
        }),
    );

    let verification = verify_claim(&state.store, claim.claim_id)?;
    if !verification.valid {
        return Err(AppError::conflict("CLAIM_NOT_VERIFIABLE", verification.reason));
    }

    let resolved_at = now_unix();
    let payout_amount_wei = state.config.claim_payout_wei.clone();
    let verification_hash = verification.evidence_hash.clone();
    let claim = if verification.approved {
        advance_claim(&state.store, claim.claim_id, ClaimStatus::Approved, resolved_at, |c| {
            c.payout_amount_wei = Some(payout_amount_wei);
            c.verification_hash = Some(verification_hash);
            c.resolved_at = Some(resolved_at);
        })?
    } else {
        advance_claim(&state.store, claim.claim_id, ClaimStatus::Rejected, resolved_at, |c| {
            c.verification_hash = Some(verification_hash);
            c.resolved_at = Some(resolved_at);
        })?
    };

    mirror_claim(state, &claim).await;
    info!(
        claim_id = claim.claim_id,
        status = claim.status.as_str(),
        reason = %verification.reason,
        "claim resolved"
    );
    notify_operator(
        state,
        claim.agent_id,
        WarrantyEvent::ClaimResolved,
        json!({
            "claim_id": claim.claim_id,
            "status": claim.status.as_str(),
            "approved": verification.approved,
            "reason": verification.reason,
            "evidence_hash": verification.evidence_hash,
        }),
    );

    if verification.approved {
        if let Err(err) = snapshot_score(state, claim.agent_id).await {
            warn!(claim_id = claim.claim_id, error_code = err.code, reason = %err.message, "snapshot after approval failed");
        }
    }

    let settlement_pending = spawn_claim_settlement(state, &claim, reason_code, verification.approved)?;

    Ok(SubmitClaimResponse {
        accepted: true,
        reason: verification.reason.clone(),
        claim: Some(claim),
        verification: Some(verification),
        settlement_pending,
        error_code: None,
    })
}

pub async fn get_claim(state: &AppState, claim_id: u64) -> Result<ClaimLookupResponse, AppError> {
    let claim = claim_by_id(&state.store, claim_id)?
        .ok_or_else(|| AppError::not_found("CLAIM_NOT_FOUND", format!("claim {claim_id} not found")))?;
    Ok(ClaimLookupResponse {
        found: true,
        claim: Some(claim),
        error_code: None,
        reason: "claim found".to_string(),
    })
}

pub async fn list_claims(state: &AppState, query: ListClaimsQuery) -> Result<ClaimListResponse, AppError> {
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(ClaimStatus::parse(raw).ok_or_else(|| {
            AppError::bad_request("INVALID_CLAIM_STATUS", format!("unknown claim status: {raw}"))
        })?),
        None => None,
    };
    let limit = page_size(query.limit, DEFAULT_PAGE_SIZE);

    let inner = lock_store(&state.store)?;
    let claims = inner
        .claims
        .values()
        .rev()
        .filter(|c| query.agent_id.map_or(true, |id| c.agent_id == id))
        .filter(|c| status.map_or(true, |s| c.status == s))
        .take(limit)
        .cloned()
        .collect();
    Ok(ClaimListResponse {
        claims,
        error_code: None,
        reason: "ok".to_string(),
    })
}

pub async fn get_score(state: &AppState, agent_id: u64) -> Result<ScoreResponse, AppError> {
    let score = compute_score(state, agent_id)?;
    Ok(ScoreResponse {
        found: true,
        score: Some(score),
        error_code: None,
        reason: "score computed".to_string(),
    })
}

pub async fn get_score_history(
    state: &AppState,
    agent_id: u64,
    query: HistoryQuery,
) -> Result<ScoreHistoryResponse, AppError> {
    let limit = page_size(query.limit, DEFAULT_HISTORY_SIZE);
    let inner = lock_store(&state.store)?;
    if !inner.agents.contains_key(&agent_id) {
        return Err(agent_not_found(agent_id));
    }
    let snapshots = inner
        .snapshots
        .iter()
        .rev()
        .filter(|s| s.agent_id == agent_id)
        .take(limit)
        .cloned()
        .collect();
    Ok(ScoreHistoryResponse {
        agent_id,
        snapshots,
        error_code: None,
        reason: "ok".to_string(),
    })
}

pub async fn get_dashboard_stats(state: &AppState) -> Result<DashboardStatsResponse, AppError> {
    let inner = lock_store(&state.store)?;
    Ok(DashboardStatsResponse {
        total_agents: inner.agents.len() as u64,
        total_runs: inner.runs.len() as u64,
        total_claims: inner.claims.len() as u64,
        paid_claims: inner
            .claims
            .values()
            .filter(|c| c.status == ClaimStatus::Paid)
            .count() as u64,
        total_violations: inner.agents.values().map(|a| a.violations).sum(),
        error_code: None,
        reason: "ok".to_string(),
    })
}

pub fn agent_by_id(store: &WarrantyStore, agent_id: u64) -> Result<Option<AgentRecord>, AppError> {
    Ok(lock_store(store)?.agents.get(&agent_id).cloned())
}

pub fn operator_for_agent(store: &WarrantyStore, agent_id: u64) -> Result<Option<OperatorRecord>, AppError> {
    let inner = lock_store(store)?;
    Ok(inner
        .agents
        .get(&agent_id)
        .and_then(|agent| inner.operators.get(&agent.operator_id))
        .cloned())
}

/// Resolves the agent that `agent_id` names and checks the `X-API-Key`
/// header against its operator.
pub fn authorize_agent_owner(
    store: &WarrantyStore,
    headers: &HeaderMap,
    agent_id: u64,
) -> Result<AgentRecord, AppError> {
    let presented = read_api_key(headers)?;
    let inner = lock_store(store)?;
    let agent = inner
        .agents
        .get(&agent_id)
        .cloned()
        .ok_or_else(|| agent_not_found(agent_id))?;
    let owner = inner
        .operators
        .get(&agent.operator_id)
        .ok_or_else(|| AppError::not_found("OPERATOR_NOT_FOUND", "Operator not found"))?;
    authorize_operator(presented, owner, inner.operators.values())?;
    Ok(agent)
}

/// Newest active policy of the agent. Registration keeps at most one active,
/// the highest id wins if that ever breaks.
pub fn active_policy_for_agent(store: &WarrantyStore, agent_id: u64) -> Result<Option<PolicyRecord>, AppError> {
    let inner = lock_store(store)?;
    Ok(inner
        .policies
        .values()
        .rev()
        .find(|p| p.agent_id == agent_id && p.status == PolicyStatus::Active)
        .cloned())
}

/// Evaluates and persists a run in one critical section. `build` receives the
/// agent's prior run timestamps and returns the judged run, so two concurrent
/// runs never share a stale history and the agent's counters match the runs.
pub fn commit_evaluated_run<F>(store: &WarrantyStore, agent_id: u64, build: F) -> Result<(RunRecord, AgentRecord), AppError>
where
    F: FnOnce(Vec<RunHistoryEntry>) -> Result<RunRecord, AppError>,
{
    let mut guard = lock_store(store)?;
    let inner = &mut *guard;
    if !inner.agents.contains_key(&agent_id) {
        return Err(agent_not_found(agent_id));
    }
    let history = inner
        .runs
        .iter()
        .filter(|r| r.agent_id == agent_id)
        .map(|r| RunHistoryEntry {
            timestamp: r.evaluated_at,
        })
        .collect();

    let run = build(history)?;
    if run.agent_id != agent_id {
        return Err(AppError::internal(
            "RUN_AGENT_MISMATCH",
            format!("run {} belongs to agent {}", run.run_id, run.agent_id),
        ));
    }
    if inner.run_index.contains_key(&run.run_id) {
        return Err(AppError::conflict(
            "RUN_ALREADY_EXISTS",
            format!("run {} already recorded", run.run_id),
        ));
    }
    let agent = inner
        .agents
        .get_mut(&agent_id)
        .ok_or_else(|| agent_not_found(agent_id))?;
    agent.total_runs += 1;
    if run.verdict == RunVerdict::Fail {
        agent.violations += 1;
    }
    let agent = agent.clone();

    inner.run_index.insert(run.run_id.clone(), inner.runs.len());
    inner.runs.push(run.clone());
    Ok((run, agent))
}

pub fn run_by_id(store: &WarrantyStore, run_id: &str) -> Result<Option<RunRecord>, AppError> {
    Ok(lock_store(store)?.run(run_id).cloned())
}

pub fn claim_by_id(store: &WarrantyStore, claim_id: u64) -> Result<Option<ClaimRecord>, AppError> {
    Ok(lock_store(store)?.claims.get(&claim_id).cloned())
}

/// Moves a claim forward one step and applies `update` to it, refusing any
/// transition `ClaimStatus::can_advance_to` does not allow.
pub fn advance_claim(
    store: &WarrantyStore,
    claim_id: u64,
    next: ClaimStatus,
    at: i64,
    update: impl FnOnce(&mut ClaimRecord),
) -> Result<ClaimRecord, AppError> {
    let mut inner = lock_store(store)?;
    let claim = inner
        .claims
        .get_mut(&claim_id)
        .ok_or_else(|| AppError::not_found("CLAIM_NOT_FOUND", format!("claim {claim_id} not found")))?;
    if !claim.status.can_advance_to(next) {
        return Err(AppError::conflict(
            "INVALID_CLAIM_TRANSITION",
            format!(
                "claim {claim_id} cannot move from {} to {}",
                claim.status.as_str(),
                next.as_str()
            ),
        ));
    }
    claim.transitions.push(ClaimTransition {
        from: claim.status,
        to: next,
        at,
    });
    claim.status = next;
    update(claim);
    Ok(claim.clone())
}

pub fn score_inputs(store: &WarrantyStore, agent_id: u64, recent_since: i64) -> Result<ScoreInputs, AppError> {
    lock_store(store)?.score_inputs(agent_id, recent_since)
}

/// Computes the score, appends the snapshot and moves the agent's
/// `trust_score` without releasing the lock in between.
pub fn record_snapshot(
    store: &WarrantyStore,
    agent_id: u64,
    recent_since: i64,
    now: i64,
) -> Result<RecordedSnapshot, AppError> {
    let mut guard = lock_store(store)?;
    let inner = &mut *guard;
    let result = score_from_inputs(agent_id, inner.score_inputs(agent_id, recent_since)?);
    let hash = snapshot_hash(&result)?;

    let agent = inner
        .agents
        .get_mut(&agent_id)
        .ok_or_else(|| agent_not_found(agent_id))?;
    let previous_score = agent.trust_score;
    agent.trust_score = result.score;
    let agent = agent.clone();

    let snapshot = ReputationSnapshotRecord {
        snapshot_id: next_id(&mut inner.next_snapshot_id),
        agent_id,
        score: result.score,
        total_runs: result.total_runs,
        violations: result.violations,
        snapshot_hash: hash,
        created_at: now,
    };
    inner.snapshots.push(snapshot.clone());

    Ok(RecordedSnapshot {
        result,
        snapshot,
        previous_score,
        agent,
    })
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

pub fn now_unix_f64() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub async fn mirror_operator(state: &AppState, operator: &OperatorRecord) {
    upsert_by_key(state, OPERATORS_COLLECTION, "operator_id", operator.operator_id, operator).await;
}

pub async fn mirror_agent(state: &AppState, agent: &AgentRecord) {
    upsert_by_key(state, AGENTS_COLLECTION, "agent_id", agent.agent_id, agent).await;
}

pub async fn mirror_policy(state: &AppState, policy: &PolicyRecord) {
    upsert_by_key(state, POLICIES_COLLECTION, "policy_id", policy.policy_id, policy).await;
}

pub async fn mirror_claim(state: &AppState, claim: &ClaimRecord) {
    upsert_by_key(state, CLAIMS_COLLECTION, "claim_id", claim.claim_id, claim).await;
}

pub async fn mirror_run(state: &AppState, run: &RunRecord) {
    insert_record(state, RUNS_COLLECTION, run).await;
}

pub async fn mirror_snapshot(state: &AppState, snapshot: &ReputationSnapshotRecord) {
    insert_record(state, SNAPSHOTS_COLLECTION, snapshot).await;
}

async fn upsert_by_key<T>(state: &AppState, collection: &'static str, key: &'static str, id: u64, record: &T)
where
    T: Serialize + Send + Sync,
{
    let Some(infra) = &state.infra else {
        return;
    };
    let coll: Collection<T> = infra.mongo_db.collection(collection);
    let mut filter = Document::new();
    filter.insert(key, id as i64);
    if let Err(e) = coll.replace_one(filter, record).upsert(true).await {
        warn!(collection, id, error = %e, "mongodb upsert failed");
    }
}

async fn insert_record<T>(state: &AppState, collection: &'static str, record: &T)
where
    T: Serialize + Send + Sync,
{
    let Some(infra) = &state.infra else {
        return;
    };
    let coll: Collection<T> = infra.mongo_db.collection(collection);
    if let Err(e) = coll.insert_one(record).await {
        warn!(collection, error = %e, "mongodb insert failed");
    }
}

async fn register_agent_onchain(state: &AppState, agent: &AgentRecord) -> Option<(AgentRecord, String)> {
    let settlement = state.settlement.clone()?;
    let registration = AgentRegistration {
        metadata_uri: agent.metadata_uri.clone(),
    };
    let policy = RetryPolicy::from_config(&state.config);
    let entity = match with_retry("registerAgent", policy, || settlement.register_agent(&registration)).await {
        Ok(entity) => entity,
        Err(err) => {
            warn!(agent_id = agent.agent_id, error = %err, "agent left unregistered on chain");
            return None;
        }
    };

    let updated = {
        let mut inner = lock_store(&state.store).ok()?;
        let stored = inner.agents.get_mut(&agent.agent_id)?;
        stored.chain_agent_id = Some(entity.onchain_id);
        stored.clone()
    };
    mirror_agent(state, &updated).await;
    info!(agent_id = agent.agent_id, chain_agent_id = entity.onchain_id, tx_hash = %entity.tx_hash, "agent registered on chain");
    Some((updated, entity.tx_hash))
}

async fn register_policy_onchain(
    state: &AppState,
    agent: &AgentRecord,
    policy: &PolicyRecord,
) -> Option<(PolicyRecord, String)> {
    let settlement = state.settlement.clone()?;
    let chain_agent_id = agent.chain_agent_id?;
    let registration = PolicyRegistration {
        chain_agent_id,
        policy_hash: policy.policy_hash.clone(),
        rules_uri: format!("warranty://agents/{}/policies/{}", agent.agent_id, policy.policy_id),
    };
    let retry = RetryPolicy::from_config(&state.config);
    let entity = match with_retry("registerPolicy", retry, || settlement.register_policy(&registration)).await {
        Ok(entity) => entity,
        Err(err) => {
            warn!(policy_id = policy.policy_id, error = %err, "policy left unregistered on chain");
            return None;
        }
    };

    let activation = PolicyActivation {
        chain_agent_id,
        chain_policy_id: entity.onchain_id,
    };
    if let Err(err) = with_retry("activatePolicy", retry, || settlement.activate_policy(&activation)).await {
        warn!(policy_id = policy.policy_id, error = %err, "policy activation not notarized");
    }

    let updated = {
        let mut inner = lock_store(&state.store).ok()?;
        let stored = inner.policies.get_mut(&policy.policy_id)?;
        stored.chain_policy_id = Some(entity.onchain_id);
        stored.clone()
    };
    mirror_policy(state, &updated).await;
    Some((updated, entity.tx_hash))
}

fn activate_policy_in_memory(
    store: &WarrantyStore,
    policy_id: u64,
    agent_id: u64,
) -> Result<PolicyActivationOutcome, AppError> {
    let mut inner = lock_store(store)?;
    let target = inner
        .policies
        .get(&policy_id)
        .ok_or_else(|| policy_not_found(policy_id))?;
    if target.agent_id != agent_id {
        return Err(AppError::bad_request(
            "POLICY_AGENT_MISMATCH",
            format!("policy {policy_id} does not belong to agent {agent_id}"),
        ));
    }
    if target.status == PolicyStatus::Deprecated {
        return Err(AppError::conflict(
            "POLICY_DEPRECATED",
            format!("policy {policy_id} is deprecated and cannot be reactivated"),
        ));
    }

    let mut deprecated = Vec::new();
    for sibling in inner.policies.values_mut() {
        if sibling.agent_id == agent_id && sibling.policy_id != policy_id && sibling.status == PolicyStatus::Active {
            sibling.status = PolicyStatus::Deprecated;
            deprecated.push(sibling.clone());
        }
    }
    let policy = inner
        .policies
        .get(&policy_id)
        .cloned()
        .ok_or_else(|| policy_not_found(policy_id))?;

    Ok(PolicyActivationOutcome { policy, deprecated })
}

fn spawn_claim_settlement(
    state: &AppState,
    claim: &ClaimRecord,
    reason_code: ReasonCode,
    approved: bool,
) -> Result<bool, AppError> {
    let Some(settlement) = state.settlement.clone() else {
        return Ok(false);
    };
    let Some(chain_agent_id) = agent_by_id(&state.store, claim.agent_id)?.and_then(|a| a.chain_agent_id) else {
        return Ok(false);
    };

    let state = state.clone();
    let job = ClaimSettlementJob {
        claim_id: claim.claim_id,
        agent_id: claim.agent_id,
        approved,
        submission: ClaimSubmission {
            run_id: claim.run_id.clone(),
            chain_agent_id,
            reason_code: reason_code.as_str().to_string(),
            evidence_hash: claim.evidence_hash.clone(),
        },
    };
    tokio::spawn(async move {
        settle_claim(state, settlement, job).await;
    });
    Ok(true)
}

#[derive(Debug, Clone)]
struct ClaimSettlementJob {
    claim_id: u64,
    agent_id: u64,
    approved: bool,
    submission: ClaimSubmission,
}

/// Notarizes a resolved claim: submit, resolve, and on approval pay out and
/// mark the claim paid. Any failed step ends the job; the claim keeps its
/// committed status.
async fn settle_claim(state: AppState, settlement: Arc<dyn SettlementLayer>, job: ClaimSettlementJob) {
    let retry = RetryPolicy::from_config(&state.config);
    let claim_id = job.claim_id;

    let submitted = match with_retry("submitClaim", retry, || settlement.submit_claim(&job.submission)).await {
        Ok(entity) => entity,
        Err(err) => {
            warn!(claim_id, error = %err, "claim settlement abandoned at submit");
            return;
        }
    };
    let chain_claim_id = submitted.onchain_id;
    match set_chain_claim_id(&state.store, claim_id, chain_claim_id) {
        Ok(claim) => mirror_claim(&state, &claim).await,
        Err(err) => warn!(claim_id, error_code = err.code, reason = %err.message, "chain claim id not recorded"),
    }

    let resolution = ClaimResolution {
        chain_claim_id,
        approved: job.approved,
    };
    if let Err(err) = with_retry("resolveClaim", retry, || settlement.resolve_claim(&resolution)).await {
        warn!(claim_id, error = %err, "claim settlement abandoned at resolve");
        return;
    }
    if !job.approved {
        info!(claim_id, chain_claim_id, "rejected claim notarized");
        return;
    }

    let payout = ClaimPayout { chain_claim_id };
    let receipt = match with_retry("executePayout", retry, || settlement.execute_payout(&payout)).await {
        Ok(receipt) => receipt,
        Err(err) => {
            warn!(claim_id, error = %err, "claim payout not executed");
            return;
        }
    };

    match advance_claim(&state.store, claim_id, ClaimStatus::Paid, now_unix(), |_| {}) {
        Ok(claim) => {
            mirror_claim(&state, &claim).await;
            info!(claim_id, chain_claim_id, tx_hash = %receipt.tx_hash, "claim paid");
        }
        Err(err) => {
            warn!(claim_id, error_code = err.code, reason = %err.message, "paid status not recorded");
            return;
        }
    }

    if let Err(err) = snapshot_score(&state, job.agent_id).await {
        warn!(claim_id, error_code = err.code, reason = %err.message, "snapshot after payout failed");
    }
}

fn set_chain_claim_id(store: &WarrantyStore, claim_id: u64, chain_claim_id: u64) -> Result<ClaimRecord, AppError> {
    let mut inner = lock_store(store)?;
    let claim = inner
        .claims
        .get_mut(&claim_id)
        .ok_or_else(|| AppError::not_found("CLAIM_NOT_FOUND", format!("claim {claim_id} not found")))?;
    claim.chain_claim_id = Some(chain_claim_id);
    Ok(claim.clone())
}

fn next_id(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

fn page_size(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}

fn agent_not_found(agent_id: u64) -> AppError {
    AppError::not_found("AGENT_NOT_FOUND", format!("agent {agent_id} not found"))
}

fn policy_not_found(policy_id: u64) -> AppError {
    AppError::not_found("POLICY_NOT_FOUND", format!("policy {policy_id} not found"))
}

fn run_not_found(run_id: &str) -> AppError {
    AppError::not_found("RUN_NOT_FOUND", format!("run {run_id} not found"))
}

fn lock_store(store: &WarrantyStore) -> Result<MutexGuard<'_, WarrantyStoreInner>, AppError> {
    store
        .inner
        .lock()
        .map_err(|_| AppError::internal("STORE_LOCK_ERROR", "warranty store lock poisoned"))
}
